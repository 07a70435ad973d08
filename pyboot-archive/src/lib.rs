// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Read and write the PKG archive attached to frozen Python executables.

A *package* is a TOC-indexed container appended to (or shipped beside) a
frozen application's executable. It holds marshalled bootstrap code objects,
the compressed module database (PYZ), extractable payload files, and
runtime option records. This crate knows how to locate a package (embedded
or side-loaded), walk its table of contents, and extract individual
entries. The writer half exists for the build toolchain and for tests.
*/

pub mod format;
pub mod reader;
pub mod writer;

pub use crate::{
    format::{Cookie, EntryType, TocEntry, COOKIE_LEN, MAGIC, TOC_ENTRY_HEADER_LEN},
    reader::{executable_contains_magic, Archive},
    writer::{append_package, build_package, PackageEntry},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no package archive: {0}")]
    ArchiveNotFound(String),

    #[error("side-loading forbidden: executable lacks the magic pattern")]
    SideLoadForbidden,

    #[error("malformed package archive: {0}")]
    Format(String),

    #[error("TOC entry at offset {0} steps past the TOC boundary")]
    TocBounds(usize),
}

/// Result type for this crate.
pub type ArchiveResult<T> = Result<T, Error>;
