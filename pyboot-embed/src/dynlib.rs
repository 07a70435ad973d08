// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Runtime binding to the collected Python shared library.

The library file name and version come from the package cookie; nothing
about the interpreter is known at build time. Loading probes for
`PyInitConfig_Create` to decide which of the two initialization protocols
the library speaks and binds the corresponding symbol set. The common
symbols needed after initialization are bound either way. Dropping the
handle unloads the library.
*/

use {
    crate::{error::EmbedError, ffi::*},
    libloading::Library,
    std::path::{Path, PathBuf},
};

/// Symbols used by both protocols once the interpreter runs.
#[allow(non_snake_case)]
pub struct CommonSymbols {
    pub PyImport_AddModule: PyImport_AddModuleFn,
    pub PyImport_ImportModule: PyImport_ImportModuleFn,
    pub PyImport_ExecCodeModule: PyImport_ExecCodeModuleFn,
    pub PyMarshal_ReadObjectFromString: PyMarshal_ReadObjectFromStringFn,
    pub PyModule_GetDict: PyModule_GetDictFn,
    pub PyEval_EvalCode: PyEval_EvalCodeFn,
    pub PySys_GetObject: PySys_GetObjectFn,
    pub PySys_SetObject: PySys_SetObjectFn,
    pub PyUnicode_FromString: PyUnicode_FromStringFn,
    pub PyUnicode_DecodeFSDefault: PyUnicode_DecodeFSDefaultFn,
    pub PyErr_Occurred: PyErr_OccurredFn,
    pub PyErr_Print: PyErr_PrintFn,
    pub PyErr_Clear: PyErr_ClearFn,
    pub PyRun_SimpleStringFlags: PyRun_SimpleStringFlagsFn,
    pub Py_DecRef: Py_DecRefFn,
    pub Py_FinalizeEx: Py_FinalizeExFn,
}

/// PEP 587 symbol set: `PyPreConfig`/`PyConfig` structure initialization.
#[allow(non_snake_case)]
pub struct LegacySymbols {
    pub PyPreConfig_InitIsolatedConfig: PyPreConfig_InitIsolatedConfigFn,
    pub Py_PreInitialize: Py_PreInitializeFn,
    pub PyStatus_Exception: PyStatus_ExceptionFn,
    pub PyConfig_InitIsolatedConfig: PyConfig_InitIsolatedConfigFn,
    pub PyConfig_SetBytesString: PyConfig_SetBytesStringFn,
    pub PyConfig_SetString: PyConfig_SetStringFn,
    pub PyConfig_SetBytesArgv: PyConfig_SetBytesArgvFn,
    pub PyConfig_SetArgv: PyConfig_SetArgvFn,
    pub PyConfig_SetWideStringList: PyConfig_SetWideStringListFn,
    pub PyConfig_Read: PyConfig_ReadFn,
    pub PyConfig_Clear: PyConfig_ClearFn,
    pub Py_InitializeFromConfig: Py_InitializeFromConfigFn,
}

/// PEP 741 symbol set: named-field initialization.
#[allow(non_snake_case)]
pub struct InitConfigSymbols {
    pub PyInitConfig_Create: PyInitConfig_CreateFn,
    pub PyInitConfig_Free: PyInitConfig_FreeFn,
    pub PyInitConfig_SetInt: PyInitConfig_SetIntFn,
    pub PyInitConfig_SetStr: PyInitConfig_SetStrFn,
    pub PyInitConfig_SetStrList: PyInitConfig_SetStrListFn,
    pub PyInitConfig_GetError: PyInitConfig_GetErrorFn,
    pub Py_InitializeFromInitConfig: Py_InitializeFromInitConfigFn,
}

/// Which initialization protocol was bound.
pub enum ProtocolSymbols {
    Legacy(LegacySymbols),
    InitConfig(InitConfigSymbols),
}

/// An owned handle on a loaded Python shared library.
pub struct DynamicPythonLibrary {
    // The bound function pointers are only reachable through accessors
    // taking `&self`, so they cannot outlive the owned mapping.
    common: CommonSymbols,
    protocol: ProtocolSymbols,
    version: u32,
    path: PathBuf,
    #[cfg(windows)]
    _ucrt: Option<Library>,
    _library: Library,
}

impl DynamicPythonLibrary {
    /// Load the Python shared library named by the package cookie from the
    /// application root and bind its symbols.
    pub fn load(root: &Path, libname: &str, version: u32) -> Result<Self, EmbedError> {
        let path = root.join(libname);

        #[cfg(windows)]
        let _ucrt = preload_ucrt(root);

        let library = open_library(&path)?;

        log::debug!(
            "loaded {} (Python {}.{})",
            path.display(),
            version / 100,
            version % 100
        );

        // PEP 741 probe: presence of the creation symbol selects the
        // named-setter protocol.
        let protocol = if unsafe {
            library
                .get::<PyInitConfig_CreateFn>(b"PyInitConfig_Create")
                .is_ok()
        } {
            log::debug!("library exposes PyInitConfig; using PEP 741 initialization");
            ProtocolSymbols::InitConfig(unsafe {
                InitConfigSymbols {
                    PyInitConfig_Create: bind(&library, b"PyInitConfig_Create")?,
                    PyInitConfig_Free: bind(&library, b"PyInitConfig_Free")?,
                    PyInitConfig_SetInt: bind(&library, b"PyInitConfig_SetInt")?,
                    PyInitConfig_SetStr: bind(&library, b"PyInitConfig_SetStr")?,
                    PyInitConfig_SetStrList: bind(&library, b"PyInitConfig_SetStrList")?,
                    PyInitConfig_GetError: bind(&library, b"PyInitConfig_GetError")?,
                    Py_InitializeFromInitConfig: bind(&library, b"Py_InitializeFromInitConfig")?,
                }
            })
        } else {
            log::debug!("library lacks PyInitConfig; using PEP 587 initialization");
            ProtocolSymbols::Legacy(unsafe {
                LegacySymbols {
                    PyPreConfig_InitIsolatedConfig: bind(
                        &library,
                        b"PyPreConfig_InitIsolatedConfig",
                    )?,
                    Py_PreInitialize: bind(&library, b"Py_PreInitialize")?,
                    PyStatus_Exception: bind(&library, b"PyStatus_Exception")?,
                    PyConfig_InitIsolatedConfig: bind(&library, b"PyConfig_InitIsolatedConfig")?,
                    PyConfig_SetBytesString: bind(&library, b"PyConfig_SetBytesString")?,
                    PyConfig_SetString: bind(&library, b"PyConfig_SetString")?,
                    PyConfig_SetBytesArgv: bind(&library, b"PyConfig_SetBytesArgv")?,
                    PyConfig_SetArgv: bind(&library, b"PyConfig_SetArgv")?,
                    PyConfig_SetWideStringList: bind(&library, b"PyConfig_SetWideStringList")?,
                    PyConfig_Read: bind(&library, b"PyConfig_Read")?,
                    PyConfig_Clear: bind(&library, b"PyConfig_Clear")?,
                    Py_InitializeFromConfig: bind(&library, b"Py_InitializeFromConfig")?,
                }
            })
        };

        let common = unsafe {
            CommonSymbols {
                PyImport_AddModule: bind(&library, b"PyImport_AddModule")?,
                PyImport_ImportModule: bind(&library, b"PyImport_ImportModule")?,
                PyImport_ExecCodeModule: bind(&library, b"PyImport_ExecCodeModule")?,
                PyMarshal_ReadObjectFromString: bind(&library, b"PyMarshal_ReadObjectFromString")?,
                PyModule_GetDict: bind(&library, b"PyModule_GetDict")?,
                PyEval_EvalCode: bind(&library, b"PyEval_EvalCode")?,
                PySys_GetObject: bind(&library, b"PySys_GetObject")?,
                PySys_SetObject: bind(&library, b"PySys_SetObject")?,
                PyUnicode_FromString: bind(&library, b"PyUnicode_FromString")?,
                PyUnicode_DecodeFSDefault: bind(&library, b"PyUnicode_DecodeFSDefault")?,
                PyErr_Occurred: bind(&library, b"PyErr_Occurred")?,
                PyErr_Print: bind(&library, b"PyErr_Print")?,
                PyErr_Clear: bind(&library, b"PyErr_Clear")?,
                PyRun_SimpleStringFlags: bind(&library, b"PyRun_SimpleStringFlags")?,
                Py_DecRef: bind(&library, b"Py_DecRef")?,
                Py_FinalizeEx: bind(&library, b"Py_FinalizeEx")?,
            }
        };

        Ok(Self {
            common,
            protocol,
            version,
            path,
            #[cfg(windows)]
            _ucrt,
            _library: library,
        })
    }

    /// Python version encoded as `100*major + minor`.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the PEP 741 protocol is bound.
    pub fn uses_init_config(&self) -> bool {
        matches!(self.protocol, ProtocolSymbols::InitConfig(_))
    }

    pub fn common(&self) -> &CommonSymbols {
        &self.common
    }

    pub fn protocol(&self) -> &ProtocolSymbols {
        &self.protocol
    }

    pub fn legacy(&self) -> Option<&LegacySymbols> {
        match &self.protocol {
            ProtocolSymbols::Legacy(symbols) => Some(symbols),
            ProtocolSymbols::InitConfig(_) => None,
        }
    }

    pub fn init_config(&self) -> Option<&InitConfigSymbols> {
        match &self.protocol {
            ProtocolSymbols::InitConfig(symbols) => Some(symbols),
            ProtocolSymbols::Legacy(_) => None,
        }
    }
}

/// Resolve one symbol to a bare function pointer.
///
/// The returned pointer is only valid while the owning [Library] mapping
/// is alive; [DynamicPythonLibrary] guarantees that by construction.
unsafe fn bind<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T, EmbedError> {
    let symbol: libloading::Symbol<T> = library
        .get(name)
        .map_err(|_| EmbedError::SymbolMissing(symbol_name(name)))?;

    Ok(*symbol)
}

fn symbol_name(name: &'static [u8]) -> &'static str {
    std::str::from_utf8(name).unwrap_or("<invalid symbol name>")
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, EmbedError> {
    // RTLD_GLOBAL so extension modules loaded later resolve interpreter
    // symbols against this mapping.
    let flags = libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_GLOBAL;

    let library = unsafe { libloading::os::unix::Library::open(Some(path), flags) }
        .map_err(|e| EmbedError::DynLibLoad(path.display().to_string(), e.to_string()))?;

    Ok(Library::from(library))
}

#[cfg(windows)]
fn open_library(path: &Path) -> Result<Library, EmbedError> {
    let library = unsafe {
        libloading::os::windows::Library::load_with_flags(
            path,
            libloading::os::windows::LOAD_WITH_ALTERED_SEARCH_PATH,
        )
    }
    .map_err(|e| EmbedError::DynLibLoad(path.display().to_string(), e.to_string()))?;

    Ok(Library::from(library))
}

/// Pre-load a local universal C runtime shipped beside the Python DLL, if
/// one exists. Failure is not an error: the system copy may satisfy the
/// import instead.
#[cfg(windows)]
fn preload_ucrt(root: &Path) -> Option<Library> {
    let path = root.join("ucrtbase.dll");
    if !path.exists() {
        return None;
    }

    match unsafe { libloading::os::windows::Library::new(&path) } {
        Ok(library) => {
            log::debug!("pre-loaded {}", path.display());
            Some(Library::from(library))
        }
        Err(e) => {
            log::warn!("could not pre-load {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn load_failure_is_dynliberror() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let err = DynamicPythonLibrary::load(dir.path(), "libpython3.12.so.1.0", 312)
            .err()
            .expect("loading a nonexistent library must fail");

        assert!(matches!(err, EmbedError::DynLibLoad(_, _)));

        Ok(())
    }
}
