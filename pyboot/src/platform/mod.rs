// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
OS-specific primitives.

Everything platform-conditional lives below this module: executable-path
resolution, library search paths, process spawning and waiting, signal
plumbing, restricted temp directories, and console management. The rest of
the bootloader is platform-neutral.
*/

#[cfg(target_os = "macos")]
pub mod darwin;
#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

use {anyhow::Result, std::path::PathBuf};

/// Outcome of waiting for the spawned child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    /// POSIX only: the child was terminated by this signal.
    Signal(i32),
}

/// Resolve the running executable and, when the process was launched
/// through one, the dynamic loader.
pub fn resolve_executable(argv: &[std::ffi::OsString]) -> Result<(PathBuf, Option<PathBuf>)> {
    #[cfg(unix)]
    {
        posix::resolve_executable(argv)
    }

    #[cfg(windows)]
    {
        let _ = argv;
        Ok((windows::resolve_executable()?, None))
    }
}
