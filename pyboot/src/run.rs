// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
The launch state machine.

Resolve the executable, open the archive, classify this process's role,
publish it, resolve the application root, configure the library search
path (restarting in place on POSIX when required), then branch into the
single-file parent or the interpreter codepath.
*/

use {
    crate::{
        child,
        context::{classify, BootOptions, Platform, ProcessContext, ProcessLevel},
        environment,
        error::BootError,
        parent, platform,
    },
    anyhow::{Context, Result},
    pyboot_archive::{Archive, EntryType},
    std::{ffi::OsString, path::{Path, PathBuf}},
};

pub fn run() -> Result<i32> {
    let argv: Vec<OsString> = std::env::args_os().collect();

    let (executable, dynamic_loader) = platform::resolve_executable(&argv)?;
    log::debug!("executable: {}", executable.display());
    if let Some(loader) = &dynamic_loader {
        log::debug!("launched through dynamic loader {}", loader.display());
    }

    let archive = Archive::find(&executable).context("locating package archive")?;
    log::debug!(
        "archive {} (pkg offset {}, Python {}, {})",
        archive.path().display(),
        archive.pkg_offset(),
        archive.python_version(),
        archive.python_libname()
    );

    let single_file = archive.has_extractable_entries()?;
    let has_splash = archive_has_splash(&archive)?;
    let options = BootOptions::from_archive(&archive)?;

    if environment::needs_reset(archive.path()) {
        environment::reset();
    }

    let parent_level = environment::read_parent_level()?;
    let splash_suppressed = environment::splash_suppressed();

    let level = classify(
        parent_level,
        single_file,
        Platform::current(),
        has_splash && !splash_suppressed,
    )?;
    log::debug!(
        "process level {:?} (observed parent level {:?}, single-file {})",
        level,
        parent_level,
        single_file
    );

    if level != ProcessLevel::Subprocess {
        environment::publish_level(level);
    }
    std::env::set_var(environment::ARCHIVE_FILE, archive.path());

    let mut ctx = ProcessContext {
        argv,
        argv_rewritten: None,
        executable,
        dynamic_loader,
        archive,
        single_file,
        has_splash,
        splash_suppressed,
        options,
        level,
        parent_level,
        application_root: None,
        owns_application_root: false,
        strict_unpack: environment::strict_unpack(),
        #[cfg(windows)]
        acl: None,
        splash: None,
    };

    resolve_application_root(&mut ctx)?;
    configure_library_search_path(&mut ctx)?;

    if ctx.level == ProcessLevel::Parent {
        parent::run(ctx)
    } else {
        child::run(ctx)
    }
}

fn archive_has_splash(archive: &Archive) -> Result<bool> {
    for entry in archive.entries() {
        if entry?.type_code == EntryType::Splash {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Resolve (or create) the top-level application directory.
fn resolve_application_root(ctx: &mut ProcessContext) -> Result<()> {
    if !ctx.single_file {
        let root = directory_root(
            &ctx.executable,
            ctx.options.contents_directory.as_deref(),
            cfg!(target_os = "macos"),
        )?;
        log::debug!("application root: {}", root.display());
        ctx.application_root = Some(root);
        return Ok(());
    }

    match ctx.level {
        ProcessLevel::Parent => {
            let base = match &ctx.options.runtime_tmpdir {
                Some(dir) => {
                    let dir = PathBuf::from(dir);
                    std::fs::create_dir_all(&dir).with_context(|| {
                        format!("creating runtime tmpdir {}", dir.display())
                    })?;
                    dir
                }
                None => std::env::temp_dir(),
            };

            let root = create_application_directory(ctx, &base)?;
            log::debug!("created application root {}", root.display());

            std::env::set_var(environment::APPLICATION_HOME_DIR, &root);
            ctx.application_root = Some(root);
            ctx.owns_application_root = true;
        }
        _ => {
            let root = std::env::var_os(environment::APPLICATION_HOME_DIR).ok_or_else(|| {
                BootError::EnvironmentCorrupted(format!(
                    "{} not inherited from launcher parent",
                    environment::APPLICATION_HOME_DIR
                ))
            })?;
            ctx.application_root = Some(PathBuf::from(root));
        }
    }

    Ok(())
}

#[cfg(unix)]
fn create_application_directory(_ctx: &mut ProcessContext, base: &Path) -> Result<PathBuf> {
    // tempfile creates mode 0700 directories, the owner-only guarantee.
    let dir = tempfile::Builder::new()
        .prefix("_MEI")
        .rand_bytes(6)
        .tempdir_in(base)
        .with_context(|| format!("creating application directory under {}", base.display()))?;

    Ok(dir.into_path())
}

#[cfg(windows)]
fn create_application_directory(ctx: &mut ProcessContext, base: &Path) -> Result<PathBuf> {
    let (root, acl) = platform::windows::create_restricted_directory(base)?;
    // The descriptor outlives extraction, then parent::run releases it.
    ctx.acl = Some(acl);

    Ok(root)
}

/// Application root in directory mode: the executable's directory,
/// optionally re-anchored out of a darwin app bundle, optionally joined
/// with the configured contents subdirectory.
fn directory_root(
    executable: &Path,
    contents_directory: Option<&str>,
    darwin: bool,
) -> Result<PathBuf> {
    let exe_dir = executable
        .parent()
        .ok_or_else(|| {
            BootError::EnvironmentCorrupted(format!(
                "executable {} has no parent directory",
                executable.display()
            ))
        })?
        .to_path_buf();

    let exe_dir = if darwin {
        reanchor_app_bundle(&exe_dir)
    } else {
        exe_dir
    };

    Ok(match contents_directory {
        Some(name) => exe_dir.join(name),
        None => exe_dir,
    })
}

/// `…/Foo.app/Contents/MacOS` → `…/Foo.app/Contents/Frameworks`.
fn reanchor_app_bundle(dir: &Path) -> PathBuf {
    let is_bundle_binary_dir = dir.ends_with("Contents/MacOS")
        && dir
            .ancestors()
            .nth(2)
            .and_then(|app| app.extension())
            .map_or(false, |ext| ext == "app");

    if is_bundle_binary_dir {
        dir.parent()
            .expect("checked: dir ends with Contents/MacOS")
            .join("Frameworks")
    } else {
        dir.to_path_buf()
    }
}

/// Make the application root visible to the dynamic linker before any
/// bundled shared library is loaded. On POSIX this can require replacing
/// our own process image so the fresh environment takes effect.
fn configure_library_search_path(ctx: &mut ProcessContext) -> Result<()> {
    #[cfg(windows)]
    {
        platform::windows::set_dll_search_path(ctx.application_root()?)?;
    }

    #[cfg(unix)]
    {
        match ctx.level {
            ProcessLevel::ParentNeedsRestart => {
                platform::posix::set_library_search_path(ctx.application_root()?);
                log::debug!("restarting in place for the library search path");
                platform::posix::restart_process(
                    &ctx.executable,
                    &ctx.argv,
                    ctx.dynamic_loader.as_deref(),
                )?;
                unreachable!("restart_process returns only on error");
            }
            ProcessLevel::Parent => {
                // The spawned child inherits the updated environment.
                platform::posix::set_library_search_path(ctx.application_root()?);
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn directory_root_is_executable_directory() -> Result<()> {
        let root = directory_root(Path::new("/opt/app/run"), None, false)?;
        assert_eq!(root, Path::new("/opt/app"));

        Ok(())
    }

    #[test]
    fn directory_root_joins_contents_directory() -> Result<()> {
        let root = directory_root(Path::new("/opt/app/run"), Some("_internal"), false)?;
        assert_eq!(root, Path::new("/opt/app/_internal"));

        Ok(())
    }

    #[test]
    fn app_bundle_reanchors_to_frameworks() -> Result<()> {
        let root = directory_root(
            Path::new("/Applications/Demo.app/Contents/MacOS/run"),
            None,
            true,
        )?;
        assert_eq!(
            root,
            Path::new("/Applications/Demo.app/Contents/Frameworks")
        );

        Ok(())
    }

    #[test]
    fn non_bundle_darwin_path_is_untouched() -> Result<()> {
        let root = directory_root(Path::new("/opt/app/run"), None, true)?;
        assert_eq!(root, Path::new("/opt/app"));

        // A Contents/MacOS directory outside an .app bundle stays put.
        let root = directory_root(Path::new("/srv/Contents/MacOS/run"), None, true)?;
        assert_eq!(root, Path::new("/srv/Contents/MacOS"));

        Ok(())
    }

    #[test]
    fn bundle_reanchor_composes_with_contents_directory() -> Result<()> {
        let root = directory_root(
            Path::new("/Applications/Demo.app/Contents/MacOS/run"),
            Some("_internal"),
            true,
        )?;
        assert_eq!(
            root,
            Path::new("/Applications/Demo.app/Contents/Frameworks/_internal")
        );

        Ok(())
    }
}
