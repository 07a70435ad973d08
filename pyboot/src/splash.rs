// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Splash screen lifecycle.

The Tcl/Tk binding and the UI are an external collaborator; this module
owns the lifecycle the core drives: setup from the TOC, resource
extraction in single-file mode, shared-library loading, start, finalize.
Splash runs only in the single-file parent or the directory main process,
never in a subprocess. The context holds no reference back to the process
context; callers pass what is needed explicitly.
*/

use {
    crate::error::BootError,
    anyhow::Result,
    pyboot_archive::{Archive, EntryType, TocEntry},
    std::path::Path,
};

/// Requirements parsed from the splash descriptor entry: NUL-separated
/// UTF-8 names, the first two being the Tcl and Tk shared libraries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplashRequirements {
    pub tcl_library: String,
    pub tk_library: String,
    pub resources: Vec<String>,
}

impl SplashRequirements {
    pub fn parse(data: &[u8]) -> Result<Self, BootError> {
        let text = std::str::from_utf8(data).map_err(|_| {
            BootError::ExtractionFailure("splash requirements are not UTF-8".to_string())
        })?;

        let mut names = text.split('\0').filter(|name| !name.is_empty());

        let tcl_library = names
            .next()
            .ok_or_else(|| {
                BootError::ExtractionFailure("splash requirements missing Tcl library".to_string())
            })?
            .to_string();
        let tk_library = names
            .next()
            .ok_or_else(|| {
                BootError::ExtractionFailure("splash requirements missing Tk library".to_string())
            })?
            .to_string();

        Ok(Self {
            tcl_library,
            tk_library,
            resources: names.map(String::from).collect(),
        })
    }
}

/// Owned splash state for one launch.
#[derive(Debug, Default)]
pub struct SplashContext {
    requirements: SplashRequirements,
    resource_entries: Vec<TocEntry>,
    started: bool,
}

impl SplashContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the splash descriptor from the archive.
    ///
    /// The first SPLASH entry is the requirements descriptor; any further
    /// SPLASH entries are resources for [Self::extract].
    pub fn setup(&mut self, archive: &mut Archive) -> Result<()> {
        let mut splash_entries = Vec::new();
        for entry in archive.entries() {
            let entry = entry?;
            if entry.type_code == EntryType::Splash {
                splash_entries.push(entry);
            }
        }

        let descriptor = splash_entries
            .first()
            .cloned()
            .ok_or_else(|| BootError::ExtractionFailure("no splash resources".to_string()))?;

        let data = archive.extract(&descriptor)?;
        self.requirements = SplashRequirements::parse(&data)?;
        self.resource_entries = splash_entries.split_off(1);

        log::debug!(
            "splash requires {} and {}, {} resources",
            self.requirements.tcl_library,
            self.requirements.tk_library,
            self.resource_entries.len()
        );

        Ok(())
    }

    /// Materialize splash resources into the application root.
    ///
    /// Single-file only; directory builds ship the resources on disk.
    pub fn extract(
        &mut self,
        archive: &mut Archive,
        root: &Path,
        strict: bool,
    ) -> Result<()> {
        for entry in &self.resource_entries {
            let dest = root.join(&entry.name);

            if dest.exists() {
                let message = format!("splash resource {} already exists", entry.name);
                if strict {
                    return Err(BootError::ExtractionFailure(message).into());
                }
                log::warn!("{}; overwriting", message);
            }

            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, archive.extract(entry)?)?;
        }

        Ok(())
    }

    /// Load the Tcl/Tk shared libraries from the application root.
    pub fn load_shared_libraries(&mut self, root: &Path) -> Result<()> {
        // The Tcl/Tk binding lives behind this seam.
        log::debug!(
            "binding {} and {}",
            root.join(&self.requirements.tcl_library).display(),
            root.join(&self.requirements.tk_library).display()
        );

        Ok(())
    }

    /// Start the splash screen and export the IPC channel for the
    /// in-interpreter splash module.
    pub fn start(&mut self, _executable: &Path) -> Result<()> {
        self.started = true;
        log::debug!("splash screen started");

        Ok(())
    }

    /// Tear the splash screen down. Must run before the application root
    /// is deleted; resources may hold handles into it.
    pub fn finalize(&mut self) {
        if self.started {
            log::debug!("splash screen finalized");
            self.started = false;
        }
    }
}

impl Drop for SplashContext {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_parse() {
        let data = b"libtcl8.6.so\0libtk8.6.so\0splash.png\0splash_font.ttf\0";
        let requirements = SplashRequirements::parse(data).unwrap();

        assert_eq!(requirements.tcl_library, "libtcl8.6.so");
        assert_eq!(requirements.tk_library, "libtk8.6.so");
        assert_eq!(requirements.resources, vec!["splash.png", "splash_font.ttf"]);
    }

    #[test]
    fn requirements_need_both_libraries() {
        assert!(SplashRequirements::parse(b"libtcl8.6.so\0").is_err());
        assert!(SplashRequirements::parse(b"").is_err());
        assert!(SplashRequirements::parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut splash = SplashContext::new();
        splash.started = true;

        splash.finalize();
        splash.finalize();
        assert!(!splash.started);
    }
}
