// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Layout descriptors for the PEP 587 `PyConfig` structure.

`PyConfig` has no stable in-memory layout across minor releases, so the
configurator cannot declare one `repr(C)` mirror. Instead, each supported
`(version, gil_flag)` pair carries an ordered field list mirroring that
release line's `Include/cpython/initconfig.h`; offsets are computed from
the list with C struct layout rules. Only the fields the configurator
writes are tagged; everything else participates in the walk anonymously.

The table is keyed by `2*version + gil_flag`. A version without an entry is
rejected before any interpreter function is called.
*/

use crate::{
    error::EmbedError,
    ffi::{INT_SIZE, POINTER_SIZE, ULONG_SIZE, WIDE_LIST_SIZE},
};

/// Storage class of one `PyConfig` member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// `int`.
    Int,
    /// `int` present only in windows builds of libpython.
    WindowsInt,
    /// `unsigned long`.
    ULong,
    /// `wchar_t *`.
    Pointer,
    /// `PyWideStringList`.
    WideList,
}

impl FieldKind {
    fn size(&self) -> usize {
        match self {
            Self::Int => INT_SIZE,
            Self::WindowsInt => {
                if cfg!(windows) {
                    INT_SIZE
                } else {
                    0
                }
            }
            Self::ULong => ULONG_SIZE,
            Self::Pointer => POINTER_SIZE,
            Self::WideList => WIDE_LIST_SIZE,
        }
    }

    fn align(&self) -> usize {
        match self {
            Self::Int | Self::WindowsInt => INT_SIZE,
            Self::ULong => ULONG_SIZE,
            Self::Pointer | Self::WideList => POINTER_SIZE,
        }
    }
}

/// The `PyConfig` members the configurator writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigField {
    Isolated,
    UseEnvironment,
    DevMode,
    InstallSignalHandlers,
    UseHashSeed,
    HashSeed,
    ParseArgv,
    Argv,
    ProgramName,
    Xoptions,
    Warnoptions,
    SiteImport,
    OptimizationLevel,
    WriteBytecode,
    Verbose,
    ConfigureCStdio,
    BufferedStdio,
    PathconfigWarnings,
    Home,
    ModuleSearchPathsSet,
    ModuleSearchPaths,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    kind: FieldKind,
    id: Option<ConfigField>,
}

const fn anon(kind: FieldKind) -> FieldSpec {
    FieldSpec { kind, id: None }
}

const fn field(kind: FieldKind, id: ConfigField) -> FieldSpec {
    FieldSpec { kind, id: Some(id) }
}

const I: FieldKind = FieldKind::Int;
const WI: FieldKind = FieldKind::WindowsInt;
const UL: FieldKind = FieldKind::ULong;
const P: FieldKind = FieldKind::Pointer;
const WL: FieldKind = FieldKind::WideList;

/// Mirror of CPython 3.8 `PyConfig`.
const FIELDS_V308: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // import_time
    anon(I), // show_ref_count
    anon(I), // show_alloc_count
    anon(I), // dump_refs
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // _install_importlib
    anon(I), // _init_main
];

/// Mirror of CPython 3.9 `PyConfig`.
const FIELDS_V309: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // import_time
    anon(I), // show_ref_count
    anon(I), // dump_refs
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    anon(I), // _use_peg_parser
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    anon(P), // platlibdir
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // _install_importlib
    anon(I), // _init_main
    anon(I), // _isolated_interpreter
];

/// Mirror of CPython 3.10 `PyConfig`.
const FIELDS_V310: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // import_time
    anon(I), // show_ref_count
    anon(I), // dump_refs
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    anon(WL), // orig_argv
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // warn_default_encoding
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    anon(P), // platlibdir
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // _install_importlib
    anon(I), // _init_main
    anon(I), // _isolated_interpreter
];

/// Mirror of CPython 3.11 `PyConfig`.
const FIELDS_V311: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // import_time
    anon(I), // show_ref_count
    anon(I), // dump_refs
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    anon(WL), // orig_argv
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // warn_default_encoding
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    anon(I),  // use_frozen_modules
    anon(I),  // safe_path
    anon(I),  // code_debug_ranges
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    anon(P), // platlibdir
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // stdlib_dir
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // int_max_str_digits
    anon(I), // _install_importlib
    anon(I), // _init_main
    anon(I), // _is_python_build
];

/// Mirror of CPython 3.12 `PyConfig`.
const FIELDS_V312: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // perf_profiling
    anon(I), // import_time
    anon(I), // code_debug_ranges
    anon(I), // show_ref_count
    anon(I), // dump_refs
    anon(P), // dump_refs_file
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    anon(WL), // orig_argv
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // warn_default_encoding
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    anon(I),  // use_frozen_modules
    anon(I),  // safe_path
    anon(I),  // int_max_str_digits
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    anon(P), // platlibdir
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // stdlib_dir
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // _install_importlib
    anon(I), // _init_main
    anon(I), // _is_python_build
];

/// Mirror of CPython 3.13 `PyConfig`.
const FIELDS_V313: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // perf_profiling
    anon(I), // import_time
    anon(I), // code_debug_ranges
    anon(I), // show_ref_count
    anon(I), // dump_refs
    anon(P), // dump_refs_file
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    anon(WL), // orig_argv
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // warn_default_encoding
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    anon(I),  // use_frozen_modules
    anon(I),  // safe_path
    anon(I),  // int_max_str_digits
    anon(I),  // cpu_count
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    anon(P), // platlibdir
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // stdlib_dir
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // _install_importlib
    anon(I), // _init_main
    anon(I), // _is_python_build
];

/// Mirror of CPython 3.13 `PyConfig` under `Py_GIL_DISABLED`.
const FIELDS_V313_GIL_DISABLED: &[FieldSpec] = &[
    anon(I), // _config_init
    field(I, ConfigField::Isolated),
    field(I, ConfigField::UseEnvironment),
    field(I, ConfigField::DevMode),
    field(I, ConfigField::InstallSignalHandlers),
    field(I, ConfigField::UseHashSeed),
    field(UL, ConfigField::HashSeed),
    anon(I), // faulthandler
    anon(I), // tracemalloc
    anon(I), // perf_profiling
    anon(I), // import_time
    anon(I), // code_debug_ranges
    anon(I), // show_ref_count
    anon(I), // dump_refs
    anon(P), // dump_refs_file
    anon(I), // malloc_stats
    anon(P), // filesystem_encoding
    anon(P), // filesystem_errors
    anon(P), // pycache_prefix
    field(I, ConfigField::ParseArgv),
    anon(WL), // orig_argv
    field(WL, ConfigField::Argv),
    field(P, ConfigField::ProgramName),
    field(WL, ConfigField::Xoptions),
    field(WL, ConfigField::Warnoptions),
    field(I, ConfigField::SiteImport),
    anon(I), // bytes_warning
    anon(I), // warn_default_encoding
    anon(I), // inspect
    anon(I), // interactive
    field(I, ConfigField::OptimizationLevel),
    anon(I), // parser_debug
    field(I, ConfigField::WriteBytecode),
    field(I, ConfigField::Verbose),
    anon(I), // quiet
    anon(I), // user_site_directory
    field(I, ConfigField::ConfigureCStdio),
    field(I, ConfigField::BufferedStdio),
    anon(P),  // stdio_encoding
    anon(P),  // stdio_errors
    anon(WI), // legacy_windows_stdio
    anon(P),  // check_hash_pycs_mode
    anon(I),  // use_frozen_modules
    anon(I),  // safe_path
    anon(I),  // int_max_str_digits
    anon(I),  // cpu_count
    anon(I),  // enable_gil
    field(I, ConfigField::PathconfigWarnings),
    anon(P), // pythonpath_env
    field(P, ConfigField::Home),
    anon(P), // platlibdir
    field(I, ConfigField::ModuleSearchPathsSet),
    field(WL, ConfigField::ModuleSearchPaths),
    anon(P), // stdlib_dir
    anon(P), // executable
    anon(P), // base_executable
    anon(P), // prefix
    anon(P), // base_prefix
    anon(P), // exec_prefix
    anon(P), // base_exec_prefix
    anon(I), // skip_source_first_line
    anon(P), // run_command
    anon(P), // run_module
    anon(P), // run_filename
    anon(I), // _install_importlib
    anon(I), // _init_main
    anon(I), // _is_python_build
];

/// Layout table keyed by `2*version + gil_flag`.
const LAYOUTS: &[(u32, &[FieldSpec])] = &[
    (2 * 308, FIELDS_V308),
    (2 * 309, FIELDS_V309),
    (2 * 310, FIELDS_V310),
    (2 * 311, FIELDS_V311),
    (2 * 312, FIELDS_V312),
    (2 * 313, FIELDS_V313),
    (2 * 313 + 1, FIELDS_V313_GIL_DISABLED),
];

/// Offsets into one release line's `PyConfig`.
#[derive(Clone, Copy, Debug)]
pub struct PyConfigLayout {
    fields: &'static [FieldSpec],
}

impl PyConfigLayout {
    /// Select the descriptor for a runtime, or fail before any interpreter
    /// call can be made against an unknown layout.
    pub fn for_version(version: u32, gil_disabled: bool) -> Result<Self, EmbedError> {
        let key = 2 * version + u32::from(gil_disabled);

        LAYOUTS
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, fields)| Self { fields: *fields })
            .ok_or_else(|| EmbedError::unsupported_version(version))
    }

    /// Number of described fields; the free-threaded variant differs
    /// from its base release by exactly the `enable_gil` member.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Size of the structure described by this layout.
    pub fn size(&self) -> usize {
        let mut offset = 0;
        let mut max_align = 1;

        for spec in self.fields {
            let size = spec.kind.size();
            if size == 0 {
                continue;
            }
            let align = spec.kind.align();
            max_align = max_align.max(align);
            offset = round_up(offset, align) + size;
        }

        round_up(offset, max_align)
    }

    /// Byte offset of a written field.
    pub fn offset_of(&self, wanted: ConfigField) -> Option<usize> {
        let mut offset = 0;

        for spec in self.fields {
            let size = spec.kind.size();
            if size == 0 {
                continue;
            }
            offset = round_up(offset, spec.kind.align());
            if spec.id == Some(wanted) {
                return Some(offset);
            }
            offset += size;
        }

        None
    }

    /// Written fields in declaration order.
    pub fn written_fields(&self) -> impl Iterator<Item = ConfigField> + '_ {
        self.fields.iter().filter_map(|spec| spec.id)
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    const ALL_WRITTEN: &[ConfigField] = &[
        ConfigField::Isolated,
        ConfigField::UseEnvironment,
        ConfigField::DevMode,
        ConfigField::InstallSignalHandlers,
        ConfigField::UseHashSeed,
        ConfigField::HashSeed,
        ConfigField::ParseArgv,
        ConfigField::Argv,
        ConfigField::ProgramName,
        ConfigField::Xoptions,
        ConfigField::Warnoptions,
        ConfigField::SiteImport,
        ConfigField::OptimizationLevel,
        ConfigField::WriteBytecode,
        ConfigField::Verbose,
        ConfigField::ConfigureCStdio,
        ConfigField::BufferedStdio,
        ConfigField::PathconfigWarnings,
        ConfigField::Home,
        ConfigField::ModuleSearchPathsSet,
        ConfigField::ModuleSearchPaths,
    ];

    #[test]
    fn every_supported_layout_resolves_all_written_fields() -> Result<()> {
        for version in 308..=313 {
            let layout = PyConfigLayout::for_version(version, false)?;
            for field in ALL_WRITTEN {
                assert!(
                    layout.offset_of(*field).is_some(),
                    "{:?} missing in 3.{}",
                    field,
                    version % 100
                );
            }
        }

        let layout = PyConfigLayout::for_version(313, true)?;
        for field in ALL_WRITTEN {
            assert!(layout.offset_of(*field).is_some());
        }

        Ok(())
    }

    #[test]
    fn unsupported_versions_are_rejected() {
        assert!(matches!(
            PyConfigLayout::for_version(307, false),
            Err(EmbedError::UnsupportedPythonVersion { major: 3, minor: 7 })
        ));
        assert!(PyConfigLayout::for_version(314, false).is_err());
        // Only 3.13 has a free-threaded layout.
        assert!(PyConfigLayout::for_version(312, true).is_err());
    }

    #[test]
    fn offsets_are_aligned_and_increasing() -> Result<()> {
        for (key, _) in LAYOUTS {
            let layout = PyConfigLayout::for_version(key / 2, key % 2 == 1)?;

            let mut last = None;
            for field in layout.written_fields() {
                let offset = layout.offset_of(field).unwrap();
                if let Some(last) = last {
                    assert!(offset > last, "{:?} does not advance", field);
                }
                last = Some(offset);

                assert!(offset < layout.size());
            }

            let hash_seed = layout.offset_of(ConfigField::HashSeed).unwrap();
            assert_eq!(hash_seed % crate::ffi::ULONG_SIZE, 0);

            let argv = layout.offset_of(ConfigField::Argv).unwrap();
            assert_eq!(argv % crate::ffi::POINTER_SIZE, 0);
        }

        Ok(())
    }

    #[test]
    fn layouts_grow_across_releases() -> Result<()> {
        let mut last = 0;
        for version in 308..=313 {
            let size = PyConfigLayout::for_version(version, false)?.size();
            assert!(size >= last, "3.{} shrank", version % 100);
            last = size;
        }

        // The free-threaded variant never shrinks the structure. (Its
        // extra int can be absorbed by padding before the following
        // pointer, so sizes may be equal.)
        assert!(
            PyConfigLayout::for_version(313, true)?.size()
                >= PyConfigLayout::for_version(313, false)?.size()
        );

        Ok(())
    }

    #[test]
    fn gil_flag_selects_distinct_descriptor() -> Result<()> {
        let plain = PyConfigLayout::for_version(313, false)?;
        let gil = PyConfigLayout::for_version(313, true)?;

        // enable_gil participates in the gil-disabled walk.
        assert_eq!(gil.field_count(), plain.field_count() + 1);
        // Fields before the insertion point are unaffected.
        assert_eq!(
            plain.offset_of(ConfigField::Argv),
            gil.offset_of(ConfigField::Argv)
        );

        Ok(())
    }
}
