// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Interpreter configuration against either embedding protocol.

A [Configurator] is created first: for the PEP 587 protocol this selects
the layout descriptor, so an unsupported runtime version fails here, before
any interpreter function runs. Pre-initialization follows, then
[Configurator::into_config] opens the configuration record and the five
setter operations fill it. [ConfigBuilder::initialize] starts the
interpreter and releases the record.
*/

use {
    crate::{
        dynlib::{DynamicPythonLibrary, InitConfigSymbols, LegacySymbols, ProtocolSymbols},
        error::EmbedError,
        ffi::{wchar_t, PyPreConfig, PyStatus, Py_ssize_t},
        layout::{ConfigField, PyConfigLayout},
        options::RuntimeOptions,
        pystr,
    },
    std::{
        ffi::{c_void, CString, OsString},
        os::raw::{c_char, c_int, c_ulong},
        path::{Path, PathBuf},
    },
    widestring::WideCString,
};

/// Headroom added to the descriptor-computed size when allocating the
/// PEP 587 config record. Release lines have grown trailing fields in
/// micro versions (3.11's int_max_str_digits); libpython initializing a
/// slightly larger struct than the descriptor knows must not write past
/// our allocation.
const CONFIG_HEADROOM: usize = 512;

/// The exactly-three module search paths of a frozen application.
pub fn module_search_paths(home: &Path, version: u32) -> [PathBuf; 3] {
    [
        home.join("base_library.zip"),
        home.join(format!("python{}.{}", version / 100, version % 100))
            .join("lib-dynload"),
        home.to_path_buf(),
    ]
}

/// Apply runtime options to a protocol-initialized `PyPreConfig`.
fn apply_preconfig_options(pre_config: &mut PyPreConfig, options: &RuntimeOptions) {
    // The process locale is configured for us.
    pre_config.configure_locale = 1;

    // utf8_mode is tri-state; -1 keeps the profile default.
    if options.utf8_mode >= 0 {
        pre_config.utf8_mode = options.utf8_mode;
    }
    pre_config.dev_mode = c_int::from(options.dev_mode);
}

/// Protocol-dispatching interpreter configurator.
pub struct Configurator<'py> {
    python: &'py DynamicPythonLibrary,
    /// Present only under the PEP 587 protocol.
    layout: Option<PyConfigLayout>,
}

impl<'py> Configurator<'py> {
    /// Select the configuration strategy for a loaded runtime.
    ///
    /// Fails with `UnsupportedPythonVersion` when the PEP 587 protocol is
    /// active and no layout descriptor covers the runtime. No interpreter
    /// function has been called at that point.
    pub fn new(python: &'py DynamicPythonLibrary, gil_disabled: bool) -> Result<Self, EmbedError> {
        let layout = match python.protocol() {
            ProtocolSymbols::Legacy(_) => {
                Some(PyConfigLayout::for_version(python.version(), gil_disabled)?)
            }
            ProtocolSymbols::InitConfig(_) => None,
        };

        Ok(Self { python, layout })
    }

    /// Run pre-initialization.
    ///
    /// Under PEP 741 this is a no-op: the named setters carry the
    /// pre-initialization fields and `Py_InitializeFromInitConfig`
    /// pre-initializes internally.
    pub fn pre_initialize(&self, options: &RuntimeOptions) -> Result<(), EmbedError> {
        let symbols = match self.python.protocol() {
            ProtocolSymbols::Legacy(symbols) => symbols,
            ProtocolSymbols::InitConfig(_) => return Ok(()),
        };

        let mut pre_config: PyPreConfig = unsafe { std::mem::zeroed() };
        unsafe {
            (symbols.PyPreConfig_InitIsolatedConfig)(&mut pre_config);
        }

        apply_preconfig_options(&mut pre_config, options);

        let status = unsafe { (symbols.Py_PreInitialize)(&pre_config) };
        check_status(symbols, status, "Python pre-initialization")
    }

    /// Open the configuration record.
    pub fn into_config(self) -> Result<ConfigBuilder<'py>, EmbedError> {
        match self.python.protocol() {
            ProtocolSymbols::Legacy(symbols) => {
                let layout = self
                    .layout
                    .expect("layout resolved at construction for the legacy protocol");

                let mut buffer = vec![0u8; layout.size() + CONFIG_HEADROOM];
                unsafe {
                    (symbols.PyConfig_InitIsolatedConfig)(buffer.as_mut_ptr() as *mut c_void);
                }

                Ok(ConfigBuilder::Legacy(LegacyBuilder {
                    symbols,
                    layout,
                    buffer,
                }))
            }
            ProtocolSymbols::InitConfig(symbols) => {
                let config = unsafe { (symbols.PyInitConfig_Create)() };
                if config.is_null() {
                    return Err(EmbedError::ConfigFailure(
                        "PyInitConfig_Create returned NULL".to_string(),
                    ));
                }

                Ok(ConfigBuilder::InitConfig(InitConfigBuilder {
                    symbols,
                    config,
                }))
            }
        }
    }
}

/// An open configuration record with the five setter operations.
pub enum ConfigBuilder<'py> {
    Legacy(LegacyBuilder<'py>),
    InitConfig(InitConfigBuilder<'py>),
}

impl<'py> ConfigBuilder<'py> {
    pub fn set_program_name(&mut self, program_name: &Path) -> Result<(), EmbedError> {
        match self {
            Self::Legacy(builder) => builder.set_string_field(
                ConfigField::ProgramName,
                program_name.as_os_str(),
                "setting program_name",
            ),
            Self::InitConfig(builder) => builder.set_str("program_name", program_name),
        }
    }

    pub fn set_python_home(&mut self, home: &Path) -> Result<(), EmbedError> {
        match self {
            Self::Legacy(builder) => {
                builder.set_string_field(ConfigField::Home, home.as_os_str(), "setting home")
            }
            Self::InitConfig(builder) => builder.set_str("home", home),
        }
    }

    /// Install the three frozen search paths and force the
    /// paths-were-set flag so the runtime does not recompute them.
    pub fn set_module_search_paths(
        &mut self,
        home: &Path,
        version: u32,
    ) -> Result<(), EmbedError> {
        let paths = module_search_paths(home, version);

        match self {
            Self::Legacy(builder) => {
                let wide = paths
                    .iter()
                    .map(|p| pystr::widecstring_from_path(p))
                    .collect::<Result<Vec<_>, _>>()?;

                builder.set_wide_string_list(
                    ConfigField::ModuleSearchPaths,
                    &wide,
                    "setting module_search_paths",
                )?;
                builder.set_int(ConfigField::ModuleSearchPathsSet, 1)
            }
            Self::InitConfig(builder) => {
                builder.set_int("module_search_paths_set", 1)?;
                builder.set_str_list(
                    "module_search_paths",
                    &paths
                        .iter()
                        .map(|p| path_utf8(p))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
        }
    }

    pub fn set_argv(&mut self, argv: &[OsString]) -> Result<(), EmbedError> {
        match self {
            Self::Legacy(builder) => builder.set_argv(argv),
            Self::InitConfig(builder) => {
                let args = argv
                    .iter()
                    .map(|arg| {
                        arg.to_str().map(String::from).ok_or_else(|| {
                            EmbedError::ConfigFailure(format!("{:?} is not valid UTF-8", arg))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                builder.set_str_list("argv", &args)
            }
        }
    }

    /// Map the runtime options record onto the configuration.
    pub fn set_runtime_options(&mut self, options: &RuntimeOptions) -> Result<(), EmbedError> {
        match self {
            Self::Legacy(builder) => {
                builder.set_int(ConfigField::Isolated, 1)?;
                builder.set_int(ConfigField::UseEnvironment, 0)?;
                builder.set_int(ConfigField::ParseArgv, 0)?;
                builder.set_int(ConfigField::PathconfigWarnings, 0)?;
                builder.set_int(ConfigField::SiteImport, 0)?;
                builder.set_int(ConfigField::WriteBytecode, 0)?;
                builder.set_int(ConfigField::ConfigureCStdio, 1)?;
                builder.set_int(ConfigField::BufferedStdio, options.buffered_stdio())?;
                builder.set_int(ConfigField::OptimizationLevel, options.optimize)?;
                builder.set_int(ConfigField::Verbose, options.verbose)?;
                builder.set_int(ConfigField::UseHashSeed, c_int::from(options.use_hash_seed))?;
                builder.set_ulong(ConfigField::HashSeed, options.hash_seed as c_ulong)?;
                builder.set_int(ConfigField::DevMode, c_int::from(options.dev_mode))?;
                // Installing signal handlers matches the pre-v6 behavior
                // applications depend on.
                builder.set_int(ConfigField::InstallSignalHandlers, 1)?;
                builder.set_wide_string_list(
                    ConfigField::Warnoptions,
                    &options.wflags_w,
                    "setting warnoptions",
                )?;
                builder.set_wide_string_list(
                    ConfigField::Xoptions,
                    &options.xflags_w,
                    "setting xoptions",
                )
            }
            Self::InitConfig(builder) => {
                builder.set_int("isolated", 1)?;
                builder.set_int("use_environment", 0)?;
                builder.set_int("parse_argv", 0)?;
                builder.set_int("pathconfig_warnings", 0)?;
                builder.set_int("site_import", 0)?;
                builder.set_int("write_bytecode", 0)?;
                builder.set_int("configure_c_stdio", 1)?;
                builder.set_int("buffered_stdio", i64::from(options.buffered_stdio()))?;
                builder.set_int("optimization_level", i64::from(options.optimize))?;
                builder.set_int("verbose", i64::from(options.verbose))?;
                builder.set_int("use_hash_seed", i64::from(options.use_hash_seed))?;
                builder.set_int("hash_seed", options.hash_seed as i64)?;
                builder.set_int("dev_mode", i64::from(options.dev_mode))?;
                builder.set_int("install_signal_handlers", 1)?;
                if options.utf8_mode >= 0 {
                    builder.set_int("utf8_mode", i64::from(options.utf8_mode))?;
                }

                let decode = |flags: &[CString]| -> Vec<String> {
                    flags
                        .iter()
                        .map(|flag| flag.to_string_lossy().into_owned())
                        .collect()
                };
                builder.set_str_list("warnoptions", &decode(&options.wflags))?;
                builder.set_str_list("xoptions", &decode(&options.xflags))
            }
        }
    }

    /// Start the interpreter and release the configuration record.
    pub fn initialize(self) -> Result<(), EmbedError> {
        match self {
            Self::Legacy(builder) => builder.initialize(),
            Self::InitConfig(builder) => builder.initialize(),
        }
    }
}

fn path_utf8(path: &Path) -> Result<String, EmbedError> {
    path.to_str()
        .map(String::from)
        .ok_or_else(|| EmbedError::ConfigFailure(format!("{:?} is not valid UTF-8", path)))
}

fn check_status(
    symbols: &LegacySymbols,
    status: PyStatus,
    context: &str,
) -> Result<(), EmbedError> {
    if unsafe { (symbols.PyStatus_Exception)(status) } != 0 {
        Err(EmbedError::ConfigFailure(status.describe(context)))
    } else {
        Ok(())
    }
}

/// PEP 587 configuration: a raw config record written through the layout
/// descriptor.
pub struct LegacyBuilder<'py> {
    symbols: &'py LegacySymbols,
    layout: PyConfigLayout,
    buffer: Vec<u8>,
}

impl<'py> LegacyBuilder<'py> {
    fn config_ptr(&mut self) -> *mut c_void {
        self.buffer.as_mut_ptr() as *mut c_void
    }

    fn field_ptr(&mut self, field: ConfigField) -> Result<*mut u8, EmbedError> {
        let offset = self.layout.offset_of(field).ok_or_else(|| {
            EmbedError::ConfigFailure(format!("{:?} not present in this layout", field))
        })?;

        Ok(unsafe { self.buffer.as_mut_ptr().add(offset) })
    }

    fn set_int(&mut self, field: ConfigField, value: c_int) -> Result<(), EmbedError> {
        let ptr = self.field_ptr(field)?;
        unsafe {
            (ptr as *mut c_int).write_unaligned(value);
        }

        Ok(())
    }

    fn set_ulong(&mut self, field: ConfigField, value: c_ulong) -> Result<(), EmbedError> {
        let ptr = self.field_ptr(field)?;
        unsafe {
            (ptr as *mut c_ulong).write_unaligned(value);
        }

        Ok(())
    }

    /// Write a string field through the runtime's own setter so the
    /// runtime owns the allocation.
    #[cfg(target_family = "unix")]
    fn set_string_field(
        &mut self,
        field: ConfigField,
        value: &std::ffi::OsStr,
        context: &str,
    ) -> Result<(), EmbedError> {
        let bytes = pystr::cstring_from_osstr(value)?;
        let dest = self.field_ptr(field)? as *mut *mut wchar_t;
        let config = self.config_ptr();

        let status =
            unsafe { (self.symbols.PyConfig_SetBytesString)(config, dest, bytes.as_ptr()) };
        check_status(self.symbols, status, context)
    }

    /// Write a string field through the runtime's own setter so the
    /// runtime owns the allocation.
    #[cfg(target_family = "windows")]
    fn set_string_field(
        &mut self,
        field: ConfigField,
        value: &std::ffi::OsStr,
        context: &str,
    ) -> Result<(), EmbedError> {
        let wide = pystr::widecstring_from_osstr(value)?;
        let dest = self.field_ptr(field)? as *mut *mut wchar_t;
        let config = self.config_ptr();

        let status = unsafe {
            (self.symbols.PyConfig_SetString)(config, dest, wide.as_ptr() as *const wchar_t)
        };
        check_status(self.symbols, status, context)
    }

    fn set_wide_string_list(
        &mut self,
        field: ConfigField,
        values: &[WideCString],
        context: &str,
    ) -> Result<(), EmbedError> {
        let mut items = values
            .iter()
            .map(|value| value.as_ptr() as *mut wchar_t)
            .collect::<Vec<_>>();

        let dest = self.field_ptr(field)? as *mut c_void;
        let config = self.config_ptr();

        let status = unsafe {
            (self.symbols.PyConfig_SetWideStringList)(
                config,
                dest,
                values.len() as Py_ssize_t,
                items.as_mut_ptr() as *const *mut wchar_t,
            )
        };
        check_status(self.symbols, status, context)
    }

    #[cfg(target_family = "unix")]
    fn set_argv(&mut self, argv: &[OsString]) -> Result<(), EmbedError> {
        let args = argv
            .iter()
            .map(|arg| pystr::cstring_from_osstr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let argp = args
            .iter()
            .map(|arg| arg.as_ptr() as *mut c_char)
            .collect::<Vec<_>>();

        let config = self.config_ptr();
        let status = unsafe {
            (self.symbols.PyConfig_SetBytesArgv)(
                config,
                argv.len() as Py_ssize_t,
                argp.as_ptr(),
            )
        };
        check_status(self.symbols, status, "setting argv")
    }

    #[cfg(target_family = "windows")]
    fn set_argv(&mut self, argv: &[OsString]) -> Result<(), EmbedError> {
        let args = argv
            .iter()
            .map(|arg| pystr::widecstring_from_osstr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let argp = args
            .iter()
            .map(|arg| arg.as_ptr() as *mut wchar_t)
            .collect::<Vec<_>>();

        let config = self.config_ptr();
        let status = unsafe {
            (self.symbols.PyConfig_SetArgv)(config, argv.len() as Py_ssize_t, argp.as_ptr())
        };
        check_status(self.symbols, status, "setting argv")
    }

    fn initialize(mut self) -> Result<(), EmbedError> {
        let config = self.config_ptr();

        let status = unsafe { (self.symbols.PyConfig_Read)(config) };
        check_status(self.symbols, status, "reading configuration").map_err(|e| {
            unsafe { (self.symbols.PyConfig_Clear)(config) };
            e
        })?;

        let status = unsafe { (self.symbols.Py_InitializeFromConfig)(config) };
        let result = check_status(self.symbols, status, "initializing interpreter");

        unsafe { (self.symbols.PyConfig_Clear)(config) };

        result
    }
}

/// PEP 741 configuration: every field is set by name.
pub struct InitConfigBuilder<'py> {
    symbols: &'py InitConfigSymbols,
    config: *mut c_void,
}

impl<'py> InitConfigBuilder<'py> {
    fn last_error(&self, context: &str) -> EmbedError {
        let mut message: *const c_char = std::ptr::null();

        let detail = unsafe {
            if (self.symbols.PyInitConfig_GetError)(self.config, &mut message) != 0
                && !message.is_null()
            {
                std::ffi::CStr::from_ptr(message)
                    .to_string_lossy()
                    .into_owned()
            } else {
                "unknown error".to_string()
            }
        };

        EmbedError::ConfigFailure(format!("during {}: {}", context, detail))
    }

    fn set_int(&mut self, name: &str, value: i64) -> Result<(), EmbedError> {
        let name_c = pystr::cstring_from_str(name)?;

        if unsafe { (self.symbols.PyInitConfig_SetInt)(self.config, name_c.as_ptr(), value) } != 0 {
            return Err(self.last_error(name));
        }

        Ok(())
    }

    fn set_str(&mut self, name: &str, value: &Path) -> Result<(), EmbedError> {
        let name_c = pystr::cstring_from_str(name)?;
        let value_c = pystr::cstring_from_str(&path_utf8(value)?)?;

        if unsafe {
            (self.symbols.PyInitConfig_SetStr)(self.config, name_c.as_ptr(), value_c.as_ptr())
        } != 0
        {
            return Err(self.last_error(name));
        }

        Ok(())
    }

    fn set_str_list(&mut self, name: &str, values: &[String]) -> Result<(), EmbedError> {
        let name_c = pystr::cstring_from_str(name)?;
        let values_c = values
            .iter()
            .map(|value| pystr::cstring_from_str(value))
            .collect::<Result<Vec<_>, _>>()?;
        let items = values_c
            .iter()
            .map(|value| value.as_ptr())
            .collect::<Vec<_>>();

        if unsafe {
            (self.symbols.PyInitConfig_SetStrList)(
                self.config,
                name_c.as_ptr(),
                items.len(),
                items.as_ptr(),
            )
        } != 0
        {
            return Err(self.last_error(name));
        }

        Ok(())
    }

    fn initialize(mut self) -> Result<(), EmbedError> {
        let result = if unsafe { (self.symbols.Py_InitializeFromInitConfig)(self.config) } != 0 {
            Err(self.last_error("interpreter initialization"))
        } else {
            Ok(())
        };

        unsafe { (self.symbols.PyInitConfig_Free)(self.config) };
        self.config = std::ptr::null_mut();

        result
    }
}

impl<'py> Drop for InitConfigBuilder<'py> {
    fn drop(&mut self) {
        if !self.config.is_null() {
            unsafe { (self.symbols.PyInitConfig_Free)(self.config) };
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::path::Path};

    #[test]
    fn search_paths_are_exactly_three_in_order() {
        let paths = module_search_paths(Path::new("/opt/app"), 312);

        assert_eq!(paths[0], Path::new("/opt/app/base_library.zip"));
        assert_eq!(paths[1], Path::new("/opt/app/python3.12/lib-dynload"));
        assert_eq!(paths[2], Path::new("/opt/app"));
    }

    #[test]
    fn preconfig_applies_tri_state_utf8() {
        let mut pre_config: PyPreConfig = unsafe { std::mem::zeroed() };
        pre_config.utf8_mode = 7; // sentinel standing in for the profile default

        let options = RuntimeOptions::new();
        apply_preconfig_options(&mut pre_config, &options);
        assert_eq!(pre_config.utf8_mode, 7);
        assert_eq!(pre_config.configure_locale, 1);
        assert_eq!(pre_config.dev_mode, 0);

        let options = RuntimeOptions {
            utf8_mode: 0,
            dev_mode: true,
            ..RuntimeOptions::new()
        };
        apply_preconfig_options(&mut pre_config, &options);
        assert_eq!(pre_config.utf8_mode, 0);
        assert_eq!(pre_config.dev_mode, 1);
    }
}
