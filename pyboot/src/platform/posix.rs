// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! POSIX process, signal, and path primitives. */

use {
    crate::{context::ASYNC_STATE, error::BootError},
    anyhow::{anyhow, Context, Result},
    std::{
        ffi::{CString, OsString},
        os::unix::ffi::OsStrExt,
        path::{Path, PathBuf},
    },
};

/// Signals kept at their default disposition in the forwarding parent:
/// child status and job control.
const EXEMPT_SIGNALS: &[libc::c_int] = &[libc::SIGCHLD, libc::SIGTSTP, libc::SIGCONT];

/// Forwarders cover the classic signal range; the realtime signals are
/// left alone.
const NUM_SIGNALS: libc::c_int = 32;

fn cstring_from_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path {} contains NUL", path.display()))
}

fn cstring_argv(argv: &[OsString]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|arg| {
            CString::new(arg.as_bytes())
                .with_context(|| format!("argument {:?} contains NUL", arg))
        })
        .collect()
}

/// Resolve the running executable, detecting launches through an explicit
/// dynamic loader (`ld-linux… ./app`), where the kernel-reported image is
/// the loader rather than the application.
pub fn resolve_executable(argv: &[OsString]) -> Result<(PathBuf, Option<PathBuf>)> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(image) = std::fs::read_link("/proc/self/exe") {
            let is_loader = image
                .file_name()
                .and_then(std::ffi::OsStr::to_str)
                .map_or(false, |name| name.starts_with("ld-"));

            if !is_loader {
                return Ok((canonicalize(&image)?, None));
            }

            let argv0 = argv
                .first()
                .ok_or_else(|| anyhow!("empty argv under a dynamic loader"))?;
            return Ok((resolve_argv0(Path::new(argv0))?, Some(image)));
        }
    }

    #[cfg(target_os = "macos")]
    {
        use std::os::unix::ffi::OsStringExt;

        let mut size: u32 = 0;
        unsafe {
            libc::_NSGetExecutablePath(std::ptr::null_mut(), &mut size);
        }
        let mut buffer = vec![0u8; size as usize + 1];
        if unsafe { libc::_NSGetExecutablePath(buffer.as_mut_ptr() as *mut _, &mut size) } == 0 {
            let len = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
            buffer.truncate(len);
            return Ok((canonicalize(&PathBuf::from(OsString::from_vec(buffer)))?, None));
        }
    }

    let argv0 = argv.first().ok_or_else(|| anyhow!("empty argv"))?;

    Ok((resolve_argv0(Path::new(argv0))?, None))
}

/// Resolve an `argv[0]` the way the shell found it.
fn resolve_argv0(argv0: &Path) -> Result<PathBuf> {
    if argv0.components().count() > 1 {
        return canonicalize(argv0);
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(argv0);
            if candidate.is_file() {
                return canonicalize(&candidate);
            }
        }
    }

    canonicalize(argv0)
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    dunce::canonicalize(path)
        .with_context(|| format!("cannot resolve executable path {}", path.display()))
}

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Prepend the application root to the library search path, preserving
/// the inherited value for the application's own subprocesses.
pub fn set_library_search_path(root: &Path) {
    let original = std::env::var_os(LIBRARY_PATH_VAR);

    if let Some(original) = &original {
        std::env::set_var(format!("{}_ORIG", LIBRARY_PATH_VAR), original);
    }

    let value = match &original {
        Some(original) => {
            let mut joined = root.as_os_str().to_os_string();
            joined.push(":");
            joined.push(original);
            joined
        }
        None => root.as_os_str().to_os_string(),
    };

    log::debug!("{}={:?}", LIBRARY_PATH_VAR, value);
    std::env::set_var(LIBRARY_PATH_VAR, value);
}

/// Replace this process image with a fresh copy of ourselves, through the
/// recorded dynamic loader when one was used. Returns only on failure.
pub fn restart_process(
    executable: &Path,
    argv: &[OsString],
    dynamic_loader: Option<&Path>,
) -> Result<()> {
    let (program, args) = match dynamic_loader {
        Some(loader) => {
            let mut args = Vec::with_capacity(argv.len() + 1);
            args.push(loader.as_os_str().to_os_string());
            args.push(executable.as_os_str().to_os_string());
            args.extend(argv.iter().skip(1).cloned());
            (loader.to_path_buf(), args)
        }
        None => (executable.to_path_buf(), argv.to_vec()),
    };

    let program_c = cstring_from_path(&program)?;
    let args_c = cstring_argv(&args)?;
    let mut argp: Vec<*const libc::c_char> =
        args_c.iter().map(|arg| arg.as_ptr()).collect();
    argp.push(std::ptr::null());

    unsafe {
        libc::execv(program_c.as_ptr(), argp.as_ptr());
    }

    Err(BootError::PlatformFailure(format!(
        "execv {} failed: {}",
        program.display(),
        std::io::Error::last_os_error()
    ))
    .into())
}

/// Fork and exec the single-file child.
pub fn spawn_child(executable: &Path, argv: &[OsString]) -> Result<libc::pid_t> {
    let program_c = cstring_from_path(executable)?;
    let args_c = cstring_argv(argv)?;
    let mut argp: Vec<*const libc::c_char> =
        args_c.iter().map(|arg| arg.as_ptr()).collect();
    argp.push(std::ptr::null());

    match unsafe { libc::fork() } {
        -1 => Err(BootError::ChildSpawnFailure(
            std::io::Error::last_os_error().to_string(),
        )
        .into()),
        0 => unsafe {
            libc::execv(program_c.as_ptr(), argp.as_ptr());
            // Only reached when exec failed; nothing here may touch the
            // parent's state.
            libc::_exit(127)
        },
        pid => {
            log::debug!("spawned child process {}", pid);
            Ok(pid)
        }
    }
}

/// Async-signal-safe forwarder: relay to the child and record the signal.
extern "C" fn forward_signal_handler(signum: libc::c_int) {
    let pid = ASYNC_STATE.child_pid();
    if pid > 0 {
        unsafe {
            libc::kill(pid, signum);
        }
    }
    ASYNC_STATE.record_signal(signum);
}

/// Install forwarding handlers for every catchable signal except the
/// exempt set. With `ignore` the parent leaves every disposition alone
/// (the terminal still delivers job-control signals to the whole group).
pub fn install_signal_forwarders(ignore: bool) {
    if ignore {
        log::debug!("signal forwarding disabled by bootloader option");
        return;
    }

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = forward_signal_handler as usize;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        for signum in 1..NUM_SIGNALS {
            if EXEMPT_SIGNALS.contains(&signum) {
                continue;
            }
            // SIGKILL/SIGSTOP fail here; that is fine.
            libc::sigaction(signum, &action, std::ptr::null_mut());
        }
    }
}

/// Wait for the child, restarting on interruption.
pub fn wait_for_child(pid: libc::pid_t) -> Result<super::ChildExit> {
    let mut status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(BootError::PlatformFailure(format!("waitpid failed: {}", err)).into());
    }

    if libc::WIFEXITED(status) {
        Ok(super::ChildExit::Code(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Ok(super::ChildExit::Signal(libc::WTERMSIG(status)))
    } else {
        Ok(super::ChildExit::Code(-1))
    }
}

/// Re-raise a signal with the default disposition so our own exit status
/// carries the child's termination cause.
pub fn reraise_signal(signum: libc::c_int) {
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        libc::raise(signum);
    }
}

/// Apply `_PYI_LINUX_PROCESS_NAME` (15-byte kernel limit).
#[cfg(target_os = "linux")]
pub fn set_process_name(name: &std::ffi::OsStr) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > 15 {
        return Err(BootError::PlatformFailure(format!(
            "process name {:?} exceeds 15 bytes",
            name
        ))
        .into());
    }

    let name_c = CString::new(bytes).context("process name contains NUL")?;
    if unsafe { libc::prctl(libc::PR_SET_NAME, name_c.as_ptr(), 0, 0, 0) } != 0 {
        return Err(BootError::PlatformFailure(format!(
            "prctl(PR_SET_NAME): {}",
            std::io::Error::last_os_error()
        ))
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn resolve_executable_finds_this_test_binary() -> Result<()> {
        let argv = vec![OsString::from("irrelevant")];
        let (exe, loader) = resolve_executable(&argv)?;

        assert!(exe.is_absolute());
        assert!(exe.is_file());
        assert_eq!(loader, None);

        Ok(())
    }

    #[test]
    fn argv0_with_separator_is_canonicalized() -> Result<()> {
        let exe = std::env::current_exe()?;
        let resolved = resolve_argv0(&exe)?;

        assert!(resolved.is_absolute());

        Ok(())
    }

    #[test]
    fn exempt_signals_are_the_documented_three() {
        assert_eq!(
            EXEMPT_SIGNALS,
            &[libc::SIGCHLD, libc::SIGTSTP, libc::SIGCONT]
        );
    }
}
