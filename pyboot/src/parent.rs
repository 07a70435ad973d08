// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Single-file parent lifecycle: extract the archive into the ephemeral
application root, spawn the child that will run the interpreter, forward
signals and session-shutdown events to it, and guarantee cleanup of the
root afterwards.
*/

use {
    crate::{
        context::ProcessContext,
        environment,
        error::BootError,
        platform::{self, ChildExit},
        splash::SplashContext,
    },
    anyhow::{Context, Result},
    pyboot_archive::EntryType,
    std::path::{Component, Path, PathBuf},
};

pub fn run(mut ctx: ProcessContext) -> Result<i32> {
    log::debug!(
        "single-file parent (observed parent level {:?})",
        ctx.parent_level
    );

    setup_splash(&mut ctx);

    if let Err(e) = extract_archive(&mut ctx) {
        // The directory exists already; never leave it behind.
        let _ = cleanup(&mut ctx);
        return Err(e);
    }

    // Extraction is done; the owner-only descriptor has served its
    // purpose.
    #[cfg(windows)]
    {
        ctx.acl = None;
    }

    #[cfg(windows)]
    {
        use crate::context::HideConsoleMode;

        match ctx.options.hide_console {
            Some(mode @ (HideConsoleMode::HideEarly | HideConsoleMode::MinimizeEarly)) => {
                platform::windows::apply_console_mode(mode)
            }
            _ => {}
        }

        if cfg!(feature = "windowed") {
            platform::windows::dismiss_startup_cursor();
        }
    }

    #[cfg(target_os = "macos")]
    if cfg!(feature = "windowed") {
        platform::darwin::transform_process_to_background();
    }

    let exit = spawn_and_wait(&mut ctx)?;

    cleanup(&mut ctx)?;

    match exit {
        ChildExit::Code(code) => Ok(code),
        ChildExit::Signal(signum) => {
            // Re-raise after cleanup so the shell observes the child's
            // disposition.
            #[cfg(unix)]
            platform::posix::reraise_signal(signum);

            Ok(128 + signum)
        }
    }
}

/// Run the splash screen if this launch is eligible; otherwise tell the
/// in-interpreter splash module to no-op.
fn setup_splash(ctx: &mut ProcessContext) {
    if !ctx.splash_eligible() {
        std::env::set_var(environment::SPLASH_IPC, "0");
        return;
    }

    let root = match ctx.application_root() {
        Ok(root) => root.to_path_buf(),
        Err(_) => return,
    };

    let mut splash = SplashContext::new();
    let result = splash
        .setup(&mut ctx.archive)
        .and_then(|_| splash.extract(&mut ctx.archive, &root, ctx.strict_unpack))
        .and_then(|_| splash.load_shared_libraries(&root))
        .and_then(|_| splash.start(&ctx.executable));

    match result {
        Ok(()) => ctx.splash = Some(splash),
        Err(e) => {
            log::warn!("splash screen unavailable: {:#}", e);
            std::env::set_var(environment::SPLASH_IPC, "0");
        }
    }
}

/// Join an entry name onto the extraction root, refusing traversal.
fn safe_join(root: &Path, name: &str) -> Result<PathBuf, BootError> {
    let relative = Path::new(name);

    let traversal = relative.components().any(|component| {
        !matches!(component, Component::Normal(_) | Component::CurDir)
    });
    if traversal || name.is_empty() {
        return Err(BootError::ExtractionFailure(format!(
            "entry name {:?} escapes the application root",
            name
        )));
    }

    Ok(root.join(relative))
}

/// Materialize every extractable entry into the application root.
fn extract_archive(ctx: &mut ProcessContext) -> Result<()> {
    let root = ctx.application_root()?.to_path_buf();
    let strict = ctx.strict_unpack;

    let entries = ctx
        .archive
        .entries()
        .collect::<Result<Vec<_>, _>>()
        .context("walking TOC for extraction")?;

    for entry in entries {
        // Splash resources belong to the splash subsystem.
        if !entry.type_code.is_extractable() || entry.type_code == EntryType::Splash {
            continue;
        }

        let dest = safe_join(&root, &entry.name)?;

        if dest.exists() {
            let message = format!("{} already exists in {}", entry.name, root.display());
            if strict {
                return Err(BootError::ExtractionFailure(message).into());
            }
            log::warn!("{}; overwriting", message);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory for {}", entry.name))?;
        }

        let data = ctx
            .archive
            .extract(&entry)
            .with_context(|| format!("extracting {}", entry.name))?;
        std::fs::write(&dest, data).with_context(|| format!("writing {}", entry.name))?;

        #[cfg(unix)]
        if entry.type_code == EntryType::Binary {
            use std::os::unix::fs::PermissionsExt;

            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("marking {} executable", entry.name))?;
        }

        log::debug!("extracted {}", entry.name);
    }

    Ok(())
}

#[cfg(unix)]
fn spawn_and_wait(ctx: &mut ProcessContext) -> Result<ChildExit> {
    use crate::context::ASYNC_STATE;

    platform::posix::install_signal_forwarders(ctx.options.ignore_signals);

    let pid = platform::posix::spawn_child(&ctx.executable, &ctx.argv)?;
    ASYNC_STATE.set_child_pid(pid);

    let exit = platform::posix::wait_for_child(pid)?;
    ASYNC_STATE.set_child_pid(0);

    if let ChildExit::Signal(signum) = exit {
        log::debug!(
            "child terminated by signal {} (last forwarded signal {})",
            signum,
            ASYNC_STATE.last_signal()
        );
    }

    Ok(exit)
}

#[cfg(windows)]
fn spawn_and_wait(_ctx: &mut ProcessContext) -> Result<ChildExit> {
    platform::windows::install_console_handler();
    if let Err(e) = platform::windows::create_shutdown_window() {
        log::warn!("no session-shutdown window: {:#}", e);
    }

    let child = platform::windows::spawn_child()?;

    platform::windows::wait_for_child(&child)
}

/// Common cleanup: splash first (it may hold handles into the root),
/// then the ephemeral directory, then the archive (dropped with the
/// context). Safe to call twice; the second call is a no-op.
pub fn cleanup(ctx: &mut ProcessContext) -> Result<()> {
    if let Some(mut splash) = ctx.splash.take() {
        splash.finalize();
    }

    if !ctx.owns_application_root {
        return Ok(());
    }

    let root = match ctx.application_root.take() {
        Some(root) => root,
        None => return Ok(()),
    };
    ctx.owns_application_root = false;

    log::debug!("removing {}", root.display());

    if let Err(e) = remove_application_root(&root) {
        let message = format!("could not remove {}: {}", root.display(), e);
        if ctx.strict_unpack {
            return Err(BootError::CleanupFailure(message).into());
        }
        log::warn!("{}", message);
    }

    Ok(())
}

#[cfg(unix)]
fn remove_application_root(root: &Path) -> std::io::Result<()> {
    remove_dir_all::remove_dir_all(root)
}

#[cfg(windows)]
fn remove_application_root(root: &Path) -> std::io::Result<()> {
    // Antivirus scanners and lagging file handles make the first attempt
    // flaky; mitigate and retry once.
    match remove_dir_all::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(first) => {
            log::debug!("removal failed ({}); clearing attributes and retrying", first);
            platform::windows::clear_readonly_attributes(root);
            remove_dir_all::remove_dir_all(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn safe_join_accepts_nested_relative_names() -> Result<()> {
        let root = Path::new("/tmp/_MEI123456");

        assert_eq!(
            safe_join(root, "lib/libfoo.so")?,
            root.join("lib/libfoo.so")
        );
        assert_eq!(safe_join(root, "data.bin")?, root.join("data.bin"));

        Ok(())
    }

    #[test]
    fn safe_join_rejects_traversal() {
        let root = Path::new("/tmp/_MEI123456");

        assert!(safe_join(root, "../escape").is_err());
        assert!(safe_join(root, "lib/../../escape").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "").is_err());
    }

    fn test_context(scratch: &Path) -> Result<ProcessContext> {
        use pyboot_archive::{build_package, Archive, EntryType, PackageEntry};

        let pkg_path = scratch.join("app.pkg");
        let package = build_package(
            &[PackageEntry::new(
                EntryType::Data,
                "payload.bin",
                b"x".to_vec(),
            )],
            312,
            "libpython3.12.so.1.0",
        )?;
        std::fs::write(&pkg_path, package)?;

        Ok(ProcessContext {
            argv: vec![],
            argv_rewritten: None,
            executable: scratch.join("app"),
            dynamic_loader: None,
            archive: Archive::open_package(&pkg_path)?,
            single_file: true,
            has_splash: false,
            splash_suppressed: false,
            options: Default::default(),
            level: crate::context::ProcessLevel::Parent,
            parent_level: crate::context::ProcessLevel::Unknown,
            application_root: None,
            owns_application_root: false,
            strict_unpack: false,
            #[cfg(windows)]
            acl: None,
            splash: None,
        })
    }

    #[test]
    fn cleanup_is_idempotent_and_removes_owned_root() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let root = scratch.path().join("_MEI424242");
        std::fs::create_dir(&root)?;
        std::fs::write(root.join("payload.bin"), b"x")?;

        let mut ctx = test_context(scratch.path())?;
        ctx.application_root = Some(root.clone());
        ctx.owns_application_root = true;

        cleanup(&mut ctx)?;
        assert!(!root.exists());

        // Second invocation is a no-op.
        cleanup(&mut ctx)?;
        assert!(ctx.application_root.is_none());

        Ok(())
    }

    #[test]
    fn cleanup_leaves_unowned_roots_alone() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let root = scratch.path().join("persistent");
        std::fs::create_dir(&root)?;

        let mut ctx = test_context(scratch.path())?;
        ctx.application_root = Some(root.clone());
        ctx.owns_application_root = false;

        cleanup(&mut ctx)?;
        assert!(root.exists());
        assert!(ctx.application_root.is_some());

        Ok(())
    }

    #[test]
    fn extraction_materializes_entries_and_respects_strict_mode() -> Result<()> {
        use pyboot_archive::{build_package, Archive, EntryType, PackageEntry};

        let scratch = tempfile::tempdir()?;
        let pkg_path = scratch.path().join("app.pkg");
        let package = build_package(
            &[
                PackageEntry::new(EntryType::Binary, "libdemo.so", b"\x7fELF".to_vec())
                    .compressed(),
                PackageEntry::new(EntryType::Data, "assets/logo.png", b"PNG".to_vec()),
                PackageEntry::new(EntryType::PyModule, "pyimod01", b"code".to_vec()),
            ],
            312,
            "libpython3.12.so.1.0",
        )?;
        std::fs::write(&pkg_path, package)?;

        let root = scratch.path().join("_MEI000001");
        std::fs::create_dir(&root)?;

        let mut ctx = test_context(scratch.path())?;
        ctx.archive = Archive::open_package(&pkg_path)?;
        ctx.application_root = Some(root.clone());

        extract_archive(&mut ctx)?;

        assert_eq!(std::fs::read(root.join("libdemo.so"))?, b"\x7fELF");
        assert_eq!(std::fs::read(root.join("assets/logo.png"))?, b"PNG");
        // Bootstrap modules are not materialized.
        assert!(!root.join("pyimod01").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(root.join("libdemo.so"))?.permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        // A second pass overwrites with a warning by default…
        extract_archive(&mut ctx)?;

        // …and is fatal in strict mode.
        ctx.strict_unpack = true;
        assert!(extract_archive(&mut ctx).is_err());

        Ok(())
    }
}
