// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Package construction.

The bootloader itself only ever reads packages. The writer lives here so the
build toolchain and this workspace's tests assemble containers with the same
primitives the reader consumes.
*/

use {
    crate::{
        format::{Cookie, EntryType, TocEntry},
        ArchiveResult, Error, COOKIE_LEN,
    },
    flate2::{write::ZlibEncoder, Compression},
    std::{
        fs::OpenOptions,
        io::Write,
        path::Path,
    },
};

/// An entry to be placed into a package.
#[derive(Clone, Debug)]
pub struct PackageEntry {
    pub type_code: EntryType,
    pub name: String,
    pub data: Vec<u8>,
    pub compress: bool,
}

impl PackageEntry {
    pub fn new(type_code: EntryType, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_code,
            name: name.into(),
            data,
            compress: false,
        }
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

/// Serialize a complete package block: payloads, then TOC, then cookie.
///
/// Payload offsets are measured from the start of the returned block, so
/// the block may be written as a bare `.pkg` file or appended verbatim to
/// an executable.
pub fn build_package(
    entries: &[PackageEntry],
    python_version: u32,
    python_libname: &str,
) -> ArchiveResult<Vec<u8>> {
    let mut payloads = Vec::new();
    let mut toc_entries = Vec::with_capacity(entries.len());

    for entry in entries {
        let offset = payloads.len() as u32;

        let stored = if entry.compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&entry.data)?;
            encoder.finish()?
        } else {
            entry.data.clone()
        };

        payloads.extend_from_slice(&stored);

        toc_entries.push(TocEntry {
            entry_length: TocEntry::record_length(&entry.name) as u32,
            offset,
            compressed_length: stored.len() as u32,
            uncompressed_length: entry.data.len() as u32,
            compressed: entry.compress,
            type_code: entry.type_code,
            name: entry.name.clone(),
        });
    }

    let toc_offset = payloads.len() as u32;
    let mut toc = Vec::new();
    for entry in &toc_entries {
        entry.write_to(&mut toc)?;
    }

    let pkg_length = payloads.len() + toc.len() + COOKIE_LEN;
    let cookie = Cookie {
        pkg_length: u32::try_from(pkg_length)
            .map_err(|_| Error::Format("package exceeds 4 GiB".to_string()))?,
        toc_offset,
        toc_length: toc.len() as u32,
        python_version,
        python_libname: python_libname.to_string(),
    };

    let mut package = payloads;
    package.extend_from_slice(&toc);
    cookie.write_to(&mut package)?;

    Ok(package)
}

/// Append a serialized package block to an existing file.
pub fn append_package(path: &Path, package: &[u8]) -> ArchiveResult<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(package)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn empty_package_is_cookie_sized() -> Result<()> {
        let package = build_package(&[], 312, "libpython3.12.so.1.0")?;
        assert_eq!(package.len(), COOKIE_LEN);

        let cookie = Cookie::parse(&package)?;
        assert_eq!(cookie.pkg_length as usize, COOKIE_LEN);
        assert_eq!(cookie.toc_length, 0);

        Ok(())
    }

    #[test]
    fn payloads_precede_toc() -> Result<()> {
        let entries = vec![
            PackageEntry::new(EntryType::Data, "first.dat", b"aaaa".to_vec()),
            PackageEntry::new(EntryType::Data, "second.dat", b"bb".to_vec()),
        ];

        let package = build_package(&entries, 311, "libpython3.11.so.1.0")?;
        let cookie = Cookie::parse(&package[package.len() - COOKIE_LEN..])?;

        assert_eq!(cookie.toc_offset, 6);
        assert_eq!(&package[0..4], b"aaaa");
        assert_eq!(&package[4..6], b"bb");

        Ok(())
    }
}
