// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Bootloader error kinds. */

/// Process-orchestration failures surfaced by the bootloader itself.
///
/// Archive and interpreter failures keep their own types
/// ([pyboot_archive::Error], [pyboot_embed::EmbedError]); everything is
/// collected into `anyhow` chains on the way to the exit code.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("inherited bootloader environment is corrupted: {0}")]
    EnvironmentCorrupted(String),

    #[error("error extracting {0}")]
    ExtractionFailure(String),

    #[error("unable to spawn child process: {0}")]
    ChildSpawnFailure(String),

    #[error("cleanup failure: {0}")]
    CleanupFailure(String),

    #[error("platform error: {0}")]
    PlatformFailure(String),
}
