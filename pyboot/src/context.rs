// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Process-wide bootloader state.

One [ProcessContext] is threaded through the whole launch. Each allocated
sub-resource (archive handle, application root, splash context, interpreter
handle) has exactly one owner here and is released on the single exit path
of the role that allocated it.

The fields mutated from signal handlers and OS callbacks live in the
separate [AsyncState] record of atomics; nothing else in the context is
touched outside the main flow.
*/

use {
    crate::error::BootError,
    anyhow::Result,
    pyboot_archive::{Archive, EntryType},
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
        sync::atomic::{AtomicBool, AtomicI32, Ordering},
    },
};

/// This process's role in the launcher hierarchy.
///
/// The discriminants round-trip through `_PYI_PARENT_PROCESS_LEVEL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessLevel {
    Unknown,
    ParentNeedsRestart,
    Parent,
    Main,
    Subprocess,
}

impl ProcessLevel {
    pub fn to_env_value(self) -> i32 {
        match self {
            Self::Unknown => -2,
            Self::ParentNeedsRestart => -1,
            Self::Parent => 0,
            Self::Main => 1,
            Self::Subprocess => 2,
        }
    }

    pub fn from_env_value(value: i32) -> Option<Self> {
        match value {
            -2 => Some(Self::Unknown),
            -1 => Some(Self::ParentNeedsRestart),
            0 => Some(Self::Parent),
            1 => Some(Self::Main),
            2 => Some(Self::Subprocess),
            _ => None,
        }
    }
}

/// Compile-time platform family used by the role table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// windows (the cygwin column of the role table folds in here).
    Win32,
    Darwin,
    OtherPosix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Win32
        } else if cfg!(target_os = "macos") {
            Self::Darwin
        } else {
            Self::OtherPosix
        }
    }
}

/// Resolve this process's level from the observed parent level.
///
/// Pure so the whole table is unit-testable. `None` cells of the role
/// table are inherited-environment corruption.
pub fn classify(
    parent_level: ProcessLevel,
    single_file: bool,
    platform: Platform,
    splash_eligible: bool,
) -> Result<ProcessLevel, BootError> {
    use {Platform::*, ProcessLevel::*};

    let level = match (parent_level, single_file, platform) {
        (Unknown, true, Win32 | Darwin) => Some(Parent),
        (Unknown, true, OtherPosix) => {
            // Splash loads its shared libraries in the parent, so the
            // parent needs the library search path restart too.
            if splash_eligible {
                Some(ParentNeedsRestart)
            } else {
                Some(Parent)
            }
        }
        (Unknown, false, Win32 | Darwin) => Some(Main),
        (Unknown, false, OtherPosix) => Some(ParentNeedsRestart),

        (ParentNeedsRestart, true, Win32 | Darwin) => Some(Parent),
        (ParentNeedsRestart, true, OtherPosix) => {
            if splash_eligible {
                Some(Parent)
            } else {
                None
            }
        }
        (ParentNeedsRestart, false, OtherPosix) => Some(Main),
        (ParentNeedsRestart, false, Win32 | Darwin) => None,

        (Parent, true, _) => Some(Main),
        (Parent, false, _) => None,

        (Main, _, _) => Some(Subprocess),

        (Subprocess, _, _) => None,
    };

    level.ok_or_else(|| {
        BootError::EnvironmentCorrupted(format!(
            "parent process level {:?} is impossible here",
            parent_level
        ))
    })
}

/// `pyi-hide-console` modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HideConsoleMode {
    HideEarly,
    HideLate,
    MinimizeEarly,
    MinimizeLate,
}

impl HideConsoleMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "hide-early" => Some(Self::HideEarly),
            "hide-late" => Some(Self::HideLate),
            "minimize-early" => Some(Self::MinimizeEarly),
            "minimize-late" => Some(Self::MinimizeLate),
            _ => None,
        }
    }
}

/// Bootloader-private options (TOC `pyi-*` entries), with owned strings.
#[derive(Clone, Debug, Default)]
pub struct BootOptions {
    pub gil_disabled: bool,
    pub runtime_tmpdir: Option<String>,
    pub contents_directory: Option<String>,
    pub macos_argv_emulation: bool,
    pub hide_console: Option<HideConsoleMode>,
    pub disable_windowed_traceback: bool,
    pub ignore_signals: bool,
}

impl BootOptions {
    pub fn from_names<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut options = Self::default();

        for name in names {
            if name == "pyi-macos-argv-emulation" {
                options.macos_argv_emulation = true;
            } else if name == "pyi-disable-windowed-traceback" {
                options.disable_windowed_traceback = true;
            } else if name == "pyi-bootloader-ignore-signals" {
                options.ignore_signals = true;
            } else if let Some(flag) = name.strip_prefix("pyi-python-flag ") {
                if flag == "Py_GIL_DISABLED" {
                    options.gil_disabled = true;
                } else {
                    log::warn!("unrecognized python flag: {}", flag);
                }
            } else if let Some(value) = name.strip_prefix("pyi-runtime-tmpdir ") {
                options.runtime_tmpdir = Some(value.to_string());
            } else if let Some(value) = name.strip_prefix("pyi-contents-directory ") {
                options.contents_directory = Some(value.to_string());
            } else if let Some(value) = name.strip_prefix("pyi-hide-console ") {
                match HideConsoleMode::parse(value) {
                    Some(mode) => options.hide_console = Some(mode),
                    None => log::warn!("unrecognized hide-console mode: {}", value),
                }
            } else if name.starts_with("pyi-") {
                log::warn!("unrecognized bootloader option: {}", name);
            }
        }

        options
    }

    pub fn from_archive(archive: &Archive) -> Result<Self> {
        let mut names = Vec::new();
        for entry in archive.entries() {
            let entry = entry?;
            if entry.type_code == EntryType::RuntimeOption {
                names.push(entry.name);
            }
        }

        Ok(Self::from_names(names.iter().map(|s| s.as_str())))
    }
}

/// Fields written from signal handlers and OS callbacks, nothing else.
///
/// Writers use release ordering, the main flow reads with acquire.
pub struct AsyncState {
    shutdown: AtomicBool,
    child_pid: AtomicI32,
    last_signal: AtomicI32,
}

impl AsyncState {
    const fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            child_pid: AtomicI32::new(0),
            last_signal: AtomicI32::new(0),
        }
    }

    /// Written from the win32 console-control handler and the hidden
    /// session-shutdown window.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[cfg_attr(not(windows), allow(dead_code))]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn set_child_pid(&self, pid: i32) {
        self.child_pid.store(pid, Ordering::Release);
    }

    pub fn child_pid(&self) -> i32 {
        self.child_pid.load(Ordering::Acquire)
    }

    pub fn record_signal(&self, signum: i32) {
        self.last_signal.store(signum, Ordering::Release);
    }

    pub fn last_signal(&self) -> i32 {
        self.last_signal.load(Ordering::Acquire)
    }
}

/// The process-wide asynchronous record. A static because signal handlers
/// have no other channel to it.
pub static ASYNC_STATE: AsyncState = AsyncState::new();

/// Everything the bootloader knows about this launch.
pub struct ProcessContext {
    /// Original process arguments.
    pub argv: Vec<OsString>,
    /// Rewritten arguments, when a platform filter produced one.
    pub argv_rewritten: Option<Vec<OsString>>,
    /// Fully resolved executable path.
    pub executable: PathBuf,
    /// Dynamic loader the process was launched through, if any.
    pub dynamic_loader: Option<PathBuf>,
    pub archive: Archive,
    /// Whether the archive carries extractable entries (single-file mode).
    pub single_file: bool,
    /// Whether the archive carries splash resources.
    pub has_splash: bool,
    /// `PYINSTALLER_SUPPRESS_SPLASH_SCREEN=1`.
    pub splash_suppressed: bool,
    pub options: BootOptions,
    pub level: ProcessLevel,
    pub parent_level: ProcessLevel,
    /// Resolved application root; owned (and deleted) by the single-file
    /// parent, inherited or derived everywhere else.
    pub application_root: Option<PathBuf>,
    /// Whether this process created (and must delete) the root.
    pub owns_application_root: bool,
    pub strict_unpack: bool,
    /// Owner-only access control state for the created temp directory
    /// (windows); released after extraction.
    #[cfg(windows)]
    pub acl: Option<crate::platform::windows::RestrictedAcl>,
    /// Splash context when this role set one up.
    pub splash: Option<crate::splash::SplashContext>,
}

impl ProcessContext {
    /// The argv the interpreter should see.
    pub fn effective_argv(&self) -> &[OsString] {
        self.argv_rewritten.as_deref().unwrap_or(&self.argv)
    }

    pub fn application_root(&self) -> Result<&Path, BootError> {
        self.application_root.as_deref().ok_or_else(|| {
            BootError::EnvironmentCorrupted("application root not resolved".to_string())
        })
    }

    /// Whether this role runs the splash screen.
    pub fn splash_eligible(&self) -> bool {
        let role_ok = match self.level {
            ProcessLevel::Parent => self.single_file,
            ProcessLevel::Main => !self.single_file,
            _ => false,
        };

        role_ok && self.has_splash && !self.splash_suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_env_roundtrip() {
        for level in [
            ProcessLevel::Unknown,
            ProcessLevel::ParentNeedsRestart,
            ProcessLevel::Parent,
            ProcessLevel::Main,
            ProcessLevel::Subprocess,
        ] {
            assert_eq!(
                ProcessLevel::from_env_value(level.to_env_value()),
                Some(level)
            );
        }

        assert_eq!(ProcessLevel::from_env_value(3), None);
        assert_eq!(ProcessLevel::from_env_value(-3), None);
    }

    #[test]
    fn role_table_single_file() {
        use {Platform::*, ProcessLevel::*};

        for platform in [Win32, Darwin] {
            for splash in [false, true] {
                assert_eq!(classify(Unknown, true, platform, splash).unwrap(), Parent);
                assert_eq!(
                    classify(ParentNeedsRestart, true, platform, splash).unwrap(),
                    Parent
                );
                assert_eq!(classify(Parent, true, platform, splash).unwrap(), Main);
                assert_eq!(classify(Main, true, platform, splash).unwrap(), Subprocess);
            }
        }

        // Splash forces the posix parent through the restart.
        assert_eq!(
            classify(Unknown, true, OtherPosix, true).unwrap(),
            ParentNeedsRestart
        );
        assert_eq!(classify(Unknown, true, OtherPosix, false).unwrap(), Parent);
        assert_eq!(
            classify(ParentNeedsRestart, true, OtherPosix, true).unwrap(),
            Parent
        );
        assert!(classify(ParentNeedsRestart, true, OtherPosix, false).is_err());
        assert_eq!(classify(Parent, true, OtherPosix, true).unwrap(), Main);
        assert_eq!(
            classify(Main, true, OtherPosix, false).unwrap(),
            Subprocess
        );
    }

    #[test]
    fn role_table_directory() {
        use {Platform::*, ProcessLevel::*};

        for splash in [false, true] {
            assert_eq!(classify(Unknown, false, Win32, splash).unwrap(), Main);
            assert_eq!(classify(Unknown, false, Darwin, splash).unwrap(), Main);
            assert_eq!(
                classify(Unknown, false, OtherPosix, splash).unwrap(),
                ParentNeedsRestart
            );
            assert_eq!(
                classify(ParentNeedsRestart, false, OtherPosix, splash).unwrap(),
                Main
            );
            assert!(classify(ParentNeedsRestart, false, Win32, splash).is_err());
            assert!(classify(Parent, false, OtherPosix, splash).is_err());
            assert_eq!(
                classify(Main, false, OtherPosix, splash).unwrap(),
                Subprocess
            );
        }
    }

    #[test]
    fn subprocess_as_parent_level_is_corruption() {
        assert!(classify(
            ProcessLevel::Subprocess,
            true,
            Platform::OtherPosix,
            false
        )
        .is_err());
    }

    #[test]
    fn boot_options_parse() {
        let options = BootOptions::from_names(
            [
                "pyi-python-flag Py_GIL_DISABLED",
                "pyi-runtime-tmpdir /var/tmp/app",
                "pyi-contents-directory _internal",
                "pyi-macos-argv-emulation",
                "pyi-hide-console minimize-late",
                "pyi-disable-windowed-traceback",
                "pyi-bootloader-ignore-signals",
                "v",
                "W ignore",
            ]
            .into_iter(),
        );

        assert!(options.gil_disabled);
        assert_eq!(options.runtime_tmpdir.as_deref(), Some("/var/tmp/app"));
        assert_eq!(options.contents_directory.as_deref(), Some("_internal"));
        assert!(options.macos_argv_emulation);
        assert_eq!(options.hide_console, Some(HideConsoleMode::MinimizeLate));
        assert!(options.disable_windowed_traceback);
        assert!(options.ignore_signals);
    }

    #[test]
    fn unknown_boot_options_are_tolerated() {
        let options = BootOptions::from_names(
            ["pyi-hide-console sideways", "pyi-frobnicate"].into_iter(),
        );

        assert_eq!(options.hide_console, None);
        assert!(!options.gil_disabled);
    }
}
