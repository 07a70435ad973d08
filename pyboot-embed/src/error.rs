// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error type for interpreter embedding. */

/// Represents an error encountered while binding, configuring or running
/// the embedded interpreter.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("error reading package archive: {0}")]
    Archive(#[from] pyboot_archive::Error),

    #[error("error parsing runtime options: {0}")]
    OptionsParse(String),

    #[error("unable to load Python shared library {0}: {1}")]
    DynLibLoad(String, String),

    #[error("Python shared library is missing required symbol {0}")]
    SymbolMissing(&'static str),

    #[error("unsupported Python version {major}.{minor}")]
    UnsupportedPythonVersion { major: u32, minor: u32 },

    #[error("error configuring Python interpreter: {0}")]
    ConfigFailure(String),

    #[error("error during {0}")]
    Bootstrap(String),
}

impl EmbedError {
    pub fn unsupported_version(version: u32) -> Self {
        Self::UnsupportedPythonVersion {
            major: version / 100,
            minor: version % 100,
        }
    }
}
