// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-level checks of the bootloader's launch and error paths.
//!
//! No Python runtime is present in the test environment, so successful
//! launches are exercised up to the dynamic-binding step; everything
//! before it (archive resolution, role classification, restart, spawn,
//! extraction, cleanup) runs for real.

use {
    anyhow::Result,
    assert_cmd::Command,
    predicates::prelude::*,
    pyboot_archive::{build_package, EntryType, PackageEntry},
    std::path::Path,
};

/// Copy the built bootloader into a scratch directory so packages can be
/// placed beside it.
fn install_bootloader(dir: &Path) -> Result<std::path::PathBuf> {
    let source = assert_cmd::cargo::cargo_bin("pyboot");
    let dest = dir.join("run");
    std::fs::copy(&source, &dest)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(dest)
}

#[test]
fn missing_package_is_reported() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let exe = install_bootloader(scratch.path())?;

    // The bootloader image carries the side-load marker, so the failure
    // is the missing sibling package, not a format error.
    Command::new(&exe)
        .current_dir(scratch.path())
        .env_remove("_PYI_ARCHIVE_FILE")
        .env_remove("_PYI_PARENT_PROCESS_LEVEL")
        .env_remove("_PYI_APPLICATION_HOME_DIR")
        .env("TMPDIR", scratch.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains(".pkg"));

    Ok(())
}

#[cfg(all(unix, not(target_os = "macos")))]
#[test]
fn directory_mode_restarts_then_fails_at_runtime_binding() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let exe = install_bootloader(scratch.path())?;

    // No extractable entries: directory mode. On linux the first pass
    // classifies as PARENT_NEEDS_RESTART, re-execs itself, and the
    // second pass reaches the dynamic Python binding, which fails
    // because no runtime is collected beside the executable.
    let package = build_package(
        &[PackageEntry::new(
            EntryType::PyModule,
            "pyimod01_archive",
            b"not really marshal".to_vec(),
        )],
        312,
        "libpython3.12.so.1.0",
    )?;
    std::fs::write(scratch.path().join("run.pkg"), package)?;

    Command::new(&exe)
        .current_dir(scratch.path())
        .env_remove("_PYI_ARCHIVE_FILE")
        .env_remove("_PYI_PARENT_PROCESS_LEVEL")
        .env_remove("_PYI_APPLICATION_HOME_DIR")
        .env("TMPDIR", scratch.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("libpython3.12.so.1.0"));

    Ok(())
}

#[cfg(unix)]
#[test]
fn single_file_parent_extracts_spawns_and_cleans_up() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let exe = install_bootloader(scratch.path())?;

    // An extractable entry makes this single-file: the parent creates a
    // _MEI directory, extracts, spawns the MAIN child, which fails at
    // the dynamic Python binding. The parent must still remove the
    // ephemeral directory on its way out.
    let package = build_package(
        &[
            PackageEntry::new(EntryType::Data, "assets/config.toml", b"x = 1".to_vec())
                .compressed(),
            PackageEntry::new(EntryType::Binary, "libdemo.so", b"\x7fELF".to_vec()),
        ],
        312,
        "libpython3.12.so.1.0",
    )?;
    std::fs::write(scratch.path().join("run.pkg"), package)?;

    Command::new(&exe)
        .current_dir(scratch.path())
        .env_remove("_PYI_ARCHIVE_FILE")
        .env_remove("_PYI_PARENT_PROCESS_LEVEL")
        .env_remove("_PYI_APPLICATION_HOME_DIR")
        .env("TMPDIR", scratch.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("libpython3.12.so.1.0"));

    // The ephemeral directory is gone.
    let leftovers: Vec<_> = std::fs::read_dir(scratch.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("_MEI"))
        .collect();
    assert!(leftovers.is_empty(), "leftover _MEI directories: {:?}", leftovers);

    Ok(())
}
