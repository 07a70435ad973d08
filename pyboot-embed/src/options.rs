// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Interpreter runtime options embedded in the package TOC.

Options are `RUNTIME_OPTION` TOC entries whose *name* is the option text.
Names with the `pyi-` prefix are bootloader-private and ignored here; they
are consumed by the orchestrator. The TOC is walked twice: the first pass
sets scalar fields and counts the W/X flag entries (the `utf8` and `dev`
X-names are also pre-extracted here because pre-initialization needs them);
the second pass fills the flag lists, sized from the first-pass counts.

The flag lists are kept in the encoding of the active initialization
protocol: UTF-8 byte strings for PEP 741, wide strings for PEP 587. Exactly
one of the two pairs is ever populated.
*/

use {
    crate::error::EmbedError,
    pyboot_archive::{Archive, EntryType},
    std::ffi::CString,
    widestring::WideCString,
};

/// Normalized interpreter runtime options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeOptions {
    /// Accumulated `-v` count.
    pub verbose: i32,
    pub unbuffered: bool,
    /// Accumulated `-O` count.
    pub optimize: i32,
    pub use_hash_seed: bool,
    pub hash_seed: u64,
    /// Tri-state: -1 auto, 0 off, 1 on.
    pub utf8_mode: i32,
    pub dev_mode: bool,
    /// W-flags as UTF-8 byte strings (PEP 741 encoding).
    pub wflags: Vec<CString>,
    /// X-flags as UTF-8 byte strings (PEP 741 encoding).
    pub xflags: Vec<CString>,
    /// W-flags as wide strings (PEP 587 encoding).
    pub wflags_w: Vec<WideCString>,
    /// X-flags as wide strings (PEP 587 encoding).
    pub xflags_w: Vec<WideCString>,
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Self {
            utf8_mode: -1,
            ..Self::default()
        }
    }

    /// Parse options from an opened archive.
    ///
    /// `wide` selects the flag-list encoding and must match whether the
    /// PEP 587 protocol is active.
    pub fn from_archive(archive: &Archive, wide: bool) -> Result<Self, EmbedError> {
        let mut names = Vec::new();
        for entry in archive.entries() {
            let entry = entry?;
            if entry.type_code == EntryType::RuntimeOption {
                names.push(entry.name);
            }
        }

        Self::from_names(names.iter().map(|s| s.as_str()), wide)
    }

    /// Parse options from raw option texts.
    pub fn from_names<'a>(
        names: impl Iterator<Item = &'a str> + Clone,
        wide: bool,
    ) -> Result<Self, EmbedError> {
        let mut options = Self::new();

        // First pass: scalars and flag counts.
        let mut num_wflags = 0usize;
        let mut num_xflags = 0usize;

        for name in names.clone() {
            if name.starts_with("pyi-") {
                continue;
            }

            match name {
                "v" | "verbose" => options.verbose += 1,
                "u" | "unbuffered" => options.unbuffered = true,
                "O" | "optimize" => options.optimize += 1,
                _ => {
                    if let Some(value) = name.strip_prefix("hash_seed=") {
                        options.hash_seed = value.parse::<u64>().map_err(|_| {
                            EmbedError::OptionsParse(format!("invalid hash seed {:?}", value))
                        })?;
                        options.use_hash_seed = true;
                    } else if name.strip_prefix("W ").is_some() {
                        num_wflags += 1;
                    } else if let Some(arg) = name.strip_prefix("X ") {
                        num_xflags += 1;

                        // utf8 and dev feed pre-initialization; bare name
                        // or =1 enables, =0 disables.
                        let (flag, value) = match arg.split_once('=') {
                            Some((flag, value)) => (flag, Some(value)),
                            None => (arg, None),
                        };
                        match flag {
                            "utf8" => options.utf8_mode = parse_xflag_toggle(arg, value)?,
                            "dev" => options.dev_mode = parse_xflag_toggle(arg, value)? != 0,
                            _ => {}
                        }
                    } else {
                        log::warn!("unrecognized runtime option: {}", name);
                    }
                }
            }
        }

        // Second pass: fill the flag lists, sized from the counts.
        let mut wflags = Vec::with_capacity(num_wflags);
        let mut xflags = Vec::with_capacity(num_xflags);

        for name in names {
            if name.starts_with("pyi-") {
                continue;
            }

            if let Some(arg) = name.strip_prefix("W ") {
                wflags.push(arg);
            } else if let Some(arg) = name.strip_prefix("X ") {
                xflags.push(arg);
            }
        }

        if wide {
            options.wflags_w = encode_wide(&wflags)?;
            options.xflags_w = encode_wide(&xflags)?;
        } else {
            options.wflags = encode_bytes(&wflags)?;
            options.xflags = encode_bytes(&xflags)?;
        }

        Ok(options)
    }

    /// `PyConfig.buffered_stdio` / `buffered_stdio` value.
    pub fn buffered_stdio(&self) -> i32 {
        i32::from(!self.unbuffered)
    }
}

fn parse_xflag_toggle(arg: &str, value: Option<&str>) -> Result<i32, EmbedError> {
    match value {
        None | Some("1") => Ok(1),
        Some("0") => Ok(0),
        Some(_) => Err(EmbedError::OptionsParse(format!(
            "invalid X option value: {:?}",
            arg
        ))),
    }
}

fn encode_bytes(flags: &[&str]) -> Result<Vec<CString>, EmbedError> {
    flags
        .iter()
        .map(|flag| {
            CString::new(*flag)
                .map_err(|_| EmbedError::OptionsParse(format!("flag contains NUL: {:?}", flag)))
        })
        .collect()
}

fn encode_wide(flags: &[&str]) -> Result<Vec<WideCString>, EmbedError> {
    flags
        .iter()
        .map(|flag| {
            WideCString::from_str(flag)
                .map_err(|_| EmbedError::OptionsParse(format!("flag contains NUL: {:?}", flag)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    fn parse(names: &[&str], wide: bool) -> Result<RuntimeOptions, EmbedError> {
        RuntimeOptions::from_names(names.iter().copied(), wide)
    }

    #[test]
    fn empty_toc_yields_defaults() -> Result<()> {
        let options = parse(&[], false)?;

        assert_eq!(options.verbose, 0);
        assert!(!options.unbuffered);
        assert_eq!(options.optimize, 0);
        assert!(!options.use_hash_seed);
        assert_eq!(options.utf8_mode, -1);
        assert!(!options.dev_mode);

        Ok(())
    }

    #[test]
    fn scalars_accumulate() -> Result<()> {
        let options = parse(&["v", "verbose", "u", "O", "O", "hash_seed=12345"], false)?;

        assert_eq!(options.verbose, 2);
        assert!(options.unbuffered);
        assert_eq!(options.optimize, 2);
        assert!(options.use_hash_seed);
        assert_eq!(options.hash_seed, 12345);

        Ok(())
    }

    #[test]
    fn exactly_one_encoding_pair_is_populated() -> Result<()> {
        let names = &["W ignore::DeprecationWarning", "X faulthandler", "W error"];

        let bytes = parse(names, false)?;
        assert_eq!(bytes.wflags.len(), 2);
        assert_eq!(bytes.xflags.len(), 1);
        assert!(bytes.wflags_w.is_empty());
        assert!(bytes.xflags_w.is_empty());

        let wide = parse(names, true)?;
        assert!(wide.wflags.is_empty());
        assert!(wide.xflags.is_empty());
        assert_eq!(wide.wflags_w.len(), 2);
        assert_eq!(wide.xflags_w.len(), 1);

        Ok(())
    }

    #[test]
    fn wflags_and_xflags_use_separate_counts() -> Result<()> {
        // Mixed W and X entries must each land in their own list, in TOC
        // order, with no cross-list overwriting.
        let options = parse(
            &["W once", "X importtime", "W module", "X faulthandler"],
            false,
        )?;

        assert_eq!(
            options.wflags,
            vec![CString::new("once")?, CString::new("module")?]
        );
        assert_eq!(
            options.xflags,
            vec![CString::new("importtime")?, CString::new("faulthandler")?]
        );

        Ok(())
    }

    #[test]
    fn utf8_and_dev_aliases_toggle_preinit_fields() -> Result<()> {
        let options = parse(&["X utf8", "X dev"], false)?;
        assert_eq!(options.utf8_mode, 1);
        assert!(options.dev_mode);

        let options = parse(&["X utf8=0", "X dev=1"], false)?;
        assert_eq!(options.utf8_mode, 0);
        assert!(options.dev_mode);

        let options = parse(&["X utf8=1", "X dev=0"], false)?;
        assert_eq!(options.utf8_mode, 1);
        assert!(!options.dev_mode);

        // The alias entries are still regular X flags.
        assert_eq!(options.xflags.len(), 2);

        Ok(())
    }

    #[test]
    fn pyi_options_are_ignored() -> Result<()> {
        let options = parse(
            &["pyi-runtime-tmpdir /tmp", "pyi-macos-argv-emulation", "v"],
            false,
        )?;

        assert_eq!(options.verbose, 1);
        assert!(options.wflags.is_empty());
        assert!(options.xflags.is_empty());

        Ok(())
    }

    #[test]
    fn reparse_is_bitwise_equal() -> Result<()> {
        let names = &[
            "v",
            "u",
            "O",
            "hash_seed=42",
            "W ignore",
            "X dev",
            "X utf8=1",
            "W default",
        ];

        let first = parse(names, false)?;
        let second = parse(names, false)?;
        assert_eq!(first, second);

        let first_wide = parse(names, true)?;
        let second_wide = parse(names, true)?;
        assert_eq!(first_wide, second_wide);

        Ok(())
    }

    #[test]
    fn invalid_hash_seed_is_parse_error() {
        assert!(matches!(
            parse(&["hash_seed=not-a-number"], false),
            Err(EmbedError::OptionsParse(_))
        ));
    }

    #[test]
    fn invalid_xflag_toggle_is_parse_error() {
        assert!(matches!(
            parse(&["X utf8=yes"], false),
            Err(EmbedError::OptionsParse(_))
        ));
    }

    #[test]
    fn unknown_options_are_tolerated() -> Result<()> {
        let options = parse(&["frobnicate", "v"], false)?;
        assert_eq!(options.verbose, 1);

        Ok(())
    }
}
