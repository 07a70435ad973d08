// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package location and reading. */

use {
    crate::{
        format::{Cookie, TocEntry, COOKIE_LEN, MAGIC, TOC_ENTRY_HEADER_LEN},
        ArchiveResult, Error,
    },
    byteorder::{BigEndian, ByteOrder},
    flate2::read::ZlibDecoder,
    std::{
        fs::File,
        io::{Read, Seek, SeekFrom},
        path::{Path, PathBuf},
    },
};

const SCAN_CHUNK: usize = 8192;

/// An opened package archive.
///
/// The TOC is held in memory; payloads are read from the backing file on
/// demand.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    file: File,
    cookie: Cookie,
    pkg_offset: u64,
    toc: Vec<u8>,
}

impl Archive {
    /// Locate and open the package for `executable`.
    ///
    /// An embedded package is preferred. Failing that, a sibling `.pkg`
    /// file may be side-loaded, but only when the executable image carries
    /// the magic marker pattern.
    pub fn find(executable: &Path) -> ArchiveResult<Self> {
        let mut file = File::open(executable).map_err(|e| {
            Error::ArchiveNotFound(format!("cannot open {}: {}", executable.display(), e))
        })?;

        let scan = scan_for_cookie(&mut file)?;

        if let Some((cookie, pkg_offset)) = scan.cookie {
            log::debug!(
                "found embedded package in {} at offset {}",
                executable.display(),
                pkg_offset
            );
            return Self::from_parts(executable.to_path_buf(), file, cookie, pkg_offset);
        }

        if !scan.saw_magic {
            return Err(Error::SideLoadForbidden);
        }

        let pkg_path = sideload_path(executable);
        log::debug!("no embedded package; side-loading {}", pkg_path.display());

        Self::open_package(&pkg_path)
    }

    /// Open a bare package file (the side-load form).
    pub fn open_package(path: &Path) -> ArchiveResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            Error::ArchiveNotFound(format!("cannot open {}: {}", path.display(), e))
        })?;

        let len = file.seek(SeekFrom::End(0))?;
        if len < COOKIE_LEN as u64 {
            return Err(Error::Format(format!(
                "{} is too small to hold a package cookie",
                path.display()
            )));
        }

        file.seek(SeekFrom::End(-(COOKIE_LEN as i64)))?;
        let mut cookie_data = [0u8; COOKIE_LEN];
        file.read_exact(&mut cookie_data)?;
        let cookie = Cookie::parse(&cookie_data)?;

        if u64::from(cookie.pkg_length) > len {
            return Err(Error::Format(format!(
                "{} declares a package longer than the file",
                path.display()
            )));
        }
        let pkg_offset = len - u64::from(cookie.pkg_length);

        Self::from_parts(path.to_path_buf(), file, cookie, pkg_offset)
    }

    fn from_parts(
        path: PathBuf,
        mut file: File,
        cookie: Cookie,
        pkg_offset: u64,
    ) -> ArchiveResult<Self> {
        file.seek(SeekFrom::Start(pkg_offset + u64::from(cookie.toc_offset)))?;
        let mut toc = vec![0u8; cookie.toc_length as usize];
        file.read_exact(&mut toc)?;

        Ok(Self {
            path,
            file,
            cookie,
            pkg_offset,
            toc,
        })
    }

    /// Path of the file holding the package (executable or `.pkg`).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the package block inside its file; 0 when side-loaded.
    pub fn pkg_offset(&self) -> u64 {
        self.pkg_offset
    }

    pub fn python_version(&self) -> u32 {
        self.cookie.python_version
    }

    pub fn python_libname(&self) -> &str {
        &self.cookie.python_libname
    }

    /// Forward iterator over the table of contents.
    pub fn entries(&self) -> TocIter<'_> {
        TocIter {
            toc: &self.toc,
            pos: 0,
        }
    }

    /// Whether any entry requires filesystem materialization, i.e. whether
    /// the archive has single-file semantics.
    pub fn has_extractable_entries(&self) -> ArchiveResult<bool> {
        for entry in self.entries() {
            if entry?.type_code.is_extractable() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Read and decompress one entry's payload.
    pub fn extract(&mut self, entry: &TocEntry) -> ArchiveResult<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(self.pkg_offset + u64::from(entry.offset)))?;

        let mut stored = vec![0u8; entry.compressed_length as usize];
        self.file.read_exact(&mut stored)?;

        let data = if entry.compressed {
            let mut decoder = ZlibDecoder::new(stored.as_slice());
            let mut data = Vec::with_capacity(entry.uncompressed_length as usize);
            decoder
                .read_to_end(&mut data)
                .map_err(|e| Error::Format(format!("decompressing {}: {}", entry.name, e)))?;
            data
        } else {
            stored
        };

        if data.len() != entry.uncompressed_length as usize {
            return Err(Error::Format(format!(
                "{} decompressed to {} bytes; expected {}",
                entry.name,
                data.len(),
                entry.uncompressed_length
            )));
        }

        Ok(data)
    }
}

/// Iterator stepping through TOC records by their self-declared lengths.
pub struct TocIter<'a> {
    toc: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for TocIter<'a> {
    type Item = ArchiveResult<TocEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.toc.len() {
            return None;
        }

        let remaining = &self.toc[self.pos..];
        if remaining.len() < TOC_ENTRY_HEADER_LEN {
            self.pos = self.toc.len();
            return Some(Err(Error::TocBounds(self.pos)));
        }

        let entry_length = BigEndian::read_u32(&remaining[0..4]) as usize;
        if entry_length == 0 || entry_length > remaining.len() {
            let at = self.pos;
            self.pos = self.toc.len();
            return Some(Err(Error::TocBounds(at)));
        }

        let result = TocEntry::parse(&remaining[..entry_length]);
        self.pos += entry_length;

        if result.is_err() {
            self.pos = self.toc.len();
        }

        Some(result)
    }
}

struct CookieScan {
    cookie: Option<(Cookie, u64)>,
    saw_magic: bool,
}

/// Scan backward from EOF for a valid cookie.
///
/// Every magic occurrence is tried as a cookie start; the bootloader's own
/// side-load marker constant is a magic occurrence without a valid cookie
/// behind it, so parse failures keep the scan going.
fn scan_for_cookie(file: &mut File) -> ArchiveResult<CookieScan> {
    let len = file.seek(SeekFrom::End(0))?;
    let mut saw_magic = false;

    let mut chunk_start = len.saturating_sub(SCAN_CHUNK as u64);
    loop {
        // Overlap so a magic spanning the chunk edge is still seen.
        let read_len =
            ((len - chunk_start) as usize).min(SCAN_CHUNK + MAGIC.len() - 1);

        file.seek(SeekFrom::Start(chunk_start))?;
        let mut chunk = vec![0u8; read_len];
        file.read_exact(&mut chunk)?;

        for hit in find_magic_reversed(&chunk) {
            saw_magic = true;

            let cookie_start = chunk_start + hit as u64;
            if cookie_start + COOKIE_LEN as u64 > len {
                continue;
            }

            file.seek(SeekFrom::Start(cookie_start))?;
            let mut cookie_data = [0u8; COOKIE_LEN];
            file.read_exact(&mut cookie_data)?;

            let cookie = match Cookie::parse(&cookie_data) {
                Ok(cookie) => cookie,
                Err(_) => continue,
            };

            let cookie_end = cookie_start + COOKIE_LEN as u64;
            let pkg_length = u64::from(cookie.pkg_length);
            if pkg_length > cookie_end {
                continue;
            }

            return Ok(CookieScan {
                cookie: Some((cookie, cookie_end - pkg_length)),
                saw_magic,
            });
        }

        if chunk_start == 0 {
            break;
        }
        chunk_start = chunk_start.saturating_sub(SCAN_CHUNK as u64);
    }

    Ok(CookieScan {
        cookie: None,
        saw_magic,
    })
}

fn find_magic_reversed(haystack: &[u8]) -> impl Iterator<Item = usize> + '_ {
    (0..haystack.len().saturating_sub(MAGIC.len() - 1))
        .rev()
        .filter(|&i| haystack[i..i + MAGIC.len()] == MAGIC)
}

/// Probe an executable image for the side-load marker pattern.
///
/// A pattern ending at the very last byte of the file must be detected.
pub fn executable_contains_magic(path: &Path) -> ArchiveResult<bool> {
    let mut file = File::open(path)?;
    let mut carry: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; SCAN_CHUNK];

    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            return Ok(false);
        }

        let mut window = carry;
        window.extend_from_slice(&chunk[..n]);

        if window
            .windows(MAGIC.len())
            .any(|candidate| candidate == MAGIC)
        {
            return Ok(true);
        }

        let keep = window.len().saturating_sub(MAGIC.len() - 1);
        carry = window.split_off(keep);
    }
}

/// Path of the sibling package used for side-loading.
#[cfg(windows)]
pub fn sideload_path(executable: &Path) -> PathBuf {
    executable.with_extension("pkg")
}

/// Path of the sibling package used for side-loading.
#[cfg(not(windows))]
pub fn sideload_path(executable: &Path) -> PathBuf {
    let mut name = executable.as_os_str().to_os_string();
    name.push(".pkg");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            format::EntryType,
            writer::{build_package, PackageEntry},
        },
        anyhow::Result,
        std::io::Write,
    };

    fn sample_entries() -> Vec<PackageEntry> {
        vec![
            PackageEntry::new(
                EntryType::PyModule,
                "pyimod01_archive",
                b"marshalled module".to_vec(),
            )
            .compressed(),
            PackageEntry::new(EntryType::Pyz, "PYZ-00.pyz", b"pyz payload".to_vec()),
            PackageEntry::new(EntryType::RuntimeOption, "v", Vec::new()),
            PackageEntry::new(EntryType::Binary, "libfoo.so", vec![0x7f, b'E', b'L', b'F'])
                .compressed(),
        ]
    }

    #[test]
    fn sideload_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pkg_path = dir.path().join("app.pkg");

        let package = build_package(&sample_entries(), 312, "libpython3.12.so.1.0")?;
        std::fs::write(&pkg_path, &package)?;

        let mut archive = Archive::open_package(&pkg_path)?;
        assert_eq!(archive.pkg_offset(), 0);
        assert_eq!(archive.python_version(), 312);
        assert_eq!(archive.python_libname(), "libpython3.12.so.1.0");

        let entries = archive.entries().collect::<ArchiveResult<Vec<_>>>()?;
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].name, "pyimod01_archive");
        assert_eq!(archive.extract(&entries[0])?, b"marshalled module");
        assert_eq!(archive.extract(&entries[3])?, vec![0x7f, b'E', b'L', b'F']);

        assert!(archive.has_extractable_entries()?);

        Ok(())
    }

    #[test]
    fn embedded_package_has_nonzero_offset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let exe_path = dir.path().join("app");

        let mut file = std::fs::File::create(&exe_path)?;
        file.write_all(&vec![0xab; 10_000])?;
        let package = build_package(&sample_entries(), 313, "libpython3.13.so.1.0")?;
        file.write_all(&package)?;
        drop(file);

        let mut archive = Archive::find(&exe_path)?;
        assert_eq!(archive.pkg_offset(), 10_000);

        let entries = archive.entries().collect::<ArchiveResult<Vec<_>>>()?;
        assert_eq!(archive.extract(&entries[1])?, b"pyz payload");

        Ok(())
    }

    #[test]
    fn marker_only_executable_side_loads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let exe_path = dir.path().join("app");

        // An executable carrying the bare marker, no embedded package.
        let mut image = vec![0u8; 5000];
        image[2000..2008].copy_from_slice(&MAGIC);
        std::fs::write(&exe_path, &image)?;

        let package = build_package(&sample_entries(), 312, "libpython3.12.so.1.0")?;
        std::fs::write(sideload_path(&exe_path), &package)?;

        let archive = Archive::find(&exe_path)?;
        assert_eq!(archive.pkg_offset(), 0);
        assert!(archive.path().extension().is_some());

        Ok(())
    }

    #[test]
    fn missing_marker_forbids_sideload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let exe_path = dir.path().join("app");
        std::fs::write(&exe_path, vec![0u8; 5000])?;

        assert!(matches!(
            Archive::find(&exe_path),
            Err(Error::SideLoadForbidden)
        ));

        Ok(())
    }

    #[test]
    fn missing_sideload_package_is_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let exe_path = dir.path().join("app");

        let mut image = vec![0u8; 100];
        image[50..58].copy_from_slice(&MAGIC);
        std::fs::write(&exe_path, &image)?;

        assert!(matches!(
            Archive::find(&exe_path),
            Err(Error::ArchiveNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn magic_at_last_byte_is_detected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tail");

        let mut image = vec![0u8; SCAN_CHUNK * 2 + 17];
        let at = image.len() - MAGIC.len();
        image[at..].copy_from_slice(&MAGIC);
        std::fs::write(&path, &image)?;

        assert!(executable_contains_magic(&path)?);

        Ok(())
    }

    #[test]
    fn magic_spanning_chunk_boundary_is_detected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("span");

        let mut image = vec![0u8; SCAN_CHUNK * 2];
        let at = SCAN_CHUNK - 3;
        image[at..at + MAGIC.len()].copy_from_slice(&MAGIC);
        std::fs::write(&path, &image)?;

        assert!(executable_contains_magic(&path)?);

        Ok(())
    }

    #[test]
    fn zero_entry_toc_is_valid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pkg_path = dir.path().join("empty.pkg");

        let package = build_package(&[], 311, "libpython3.11.so.1.0")?;
        std::fs::write(&pkg_path, &package)?;

        let archive = Archive::open_package(&pkg_path)?;
        assert_eq!(archive.entries().count(), 0);
        assert!(!archive.has_extractable_entries()?);

        Ok(())
    }

    #[test]
    fn oversized_entry_length_is_bounds_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pkg_path = dir.path().join("bad.pkg");

        let mut package = build_package(
            &[PackageEntry::new(EntryType::Data, "x.dat", b"abc".to_vec())],
            312,
            "libpython3.12.so.1.0",
        )?;

        // Payload is 3 bytes; the TOC starts right after. Corrupt the
        // entry_length field to step past the TOC boundary.
        let toc_start = 3;
        package[toc_start..toc_start + 4].copy_from_slice(&0x0100_0000u32.to_be_bytes());
        std::fs::write(&pkg_path, &package)?;

        let archive = Archive::open_package(&pkg_path)?;
        let results = archive.entries().collect::<Vec<_>>();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::TocBounds(0))));

        Ok(())
    }

    #[test]
    fn truncated_payload_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pkg_path = dir.path().join("short.pkg");

        let package = build_package(
            &[PackageEntry::new(EntryType::Data, "x.dat", b"abcdef".to_vec()).compressed()],
            312,
            "libpython3.12.so.1.0",
        )?;
        std::fs::write(&pkg_path, &package)?;

        let mut archive = Archive::open_package(&pkg_path)?;
        let mut entries = archive.entries().collect::<ArchiveResult<Vec<_>>>()?;

        // Lie about the uncompressed size.
        entries[0].uncompressed_length += 1;
        assert!(matches!(
            archive.extract(&entries[0]),
            Err(Error::Format(_))
        ));

        Ok(())
    }
}
