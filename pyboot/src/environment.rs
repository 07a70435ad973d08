// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
The environment-variable contract between launcher generations.

Parent and child share only the archive, these variables, and the
ephemeral directory path. `_PYI_*` variables are bootloader-owned and
wiped on an explicit reset; `PYINSTALLER_*` variables are user inputs and
never touched.
*/

use {
    crate::{context::ProcessLevel, error::BootError},
    std::{env, path::Path},
};

pub const ARCHIVE_FILE: &str = "_PYI_ARCHIVE_FILE";
pub const PARENT_PROCESS_LEVEL: &str = "_PYI_PARENT_PROCESS_LEVEL";
pub const APPLICATION_HOME_DIR: &str = "_PYI_APPLICATION_HOME_DIR";
pub const SPLASH_IPC: &str = "_PYI_SPLASH_IPC";
pub const LINUX_PROCESS_NAME: &str = "_PYI_LINUX_PROCESS_NAME";

pub const RESET_ENVIRONMENT: &str = "PYINSTALLER_RESET_ENVIRONMENT";
pub const SUPPRESS_SPLASH: &str = "PYINSTALLER_SUPPRESS_SPLASH_SCREEN";
pub const STRICT_UNPACK: &str = "PYINSTALLER_STRICT_UNPACK_MODE";

/// Bootloader-owned variables removed by a reset. The linux process name
/// is user input and survives.
const RESET_VARS: &[&str] = &[
    ARCHIVE_FILE,
    PARENT_PROCESS_LEVEL,
    APPLICATION_HOME_DIR,
    SPLASH_IPC,
];

/// Read the level published by our parent; absent means `Unknown`.
pub fn read_parent_level() -> Result<ProcessLevel, BootError> {
    let value = match env::var(PARENT_PROCESS_LEVEL) {
        Ok(value) => value,
        Err(env::VarError::NotPresent) => return Ok(ProcessLevel::Unknown),
        Err(env::VarError::NotUnicode(_)) => {
            return Err(BootError::EnvironmentCorrupted(format!(
                "{} is not valid unicode",
                PARENT_PROCESS_LEVEL
            )))
        }
    };

    value
        .parse::<i32>()
        .ok()
        .and_then(ProcessLevel::from_env_value)
        .ok_or_else(|| {
            BootError::EnvironmentCorrupted(format!(
                "{}={:?} is not a process level",
                PARENT_PROCESS_LEVEL, value
            ))
        })
}

/// Publish our level for children to observe.
pub fn publish_level(level: ProcessLevel) {
    env::set_var(PARENT_PROCESS_LEVEL, level.to_env_value().to_string());
}

/// Whether the inherited bootloader environment must be wiped before
/// classification: an explicit user request, or state left behind by a
/// *different* frozen application (archive path mismatch).
pub fn needs_reset(archive_path: &Path) -> bool {
    if env::var_os(RESET_ENVIRONMENT).map_or(false, |v| v == "1") {
        log::debug!("environment reset requested via {}", RESET_ENVIRONMENT);
        return true;
    }

    match env::var_os(ARCHIVE_FILE) {
        Some(inherited) => {
            if Path::new(&inherited) != archive_path {
                log::debug!(
                    "inherited {}={:?} does not match {}; resetting",
                    ARCHIVE_FILE,
                    inherited,
                    archive_path.display()
                );
                true
            } else {
                false
            }
        }
        None => false,
    }
}

/// Wipe inherited bootloader variables.
pub fn reset() {
    for name in RESET_VARS {
        env::remove_var(name);
    }
}

pub fn splash_suppressed() -> bool {
    env::var_os(SUPPRESS_SPLASH).map_or(false, |v| v == "1")
}

pub fn strict_unpack() -> bool {
    env::var_os(STRICT_UNPACK).map_or(false, |v| v != "0")
}
