// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! On-disk primitives of the package container format. */

use {
    crate::{ArchiveResult, Error},
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Cursor, Read, Write},
};

/// Magic identifying a package cookie.
///
/// A `static` rather than a `const`: the pattern must exist verbatim in
/// the linked executable image, where it doubles as the side-load marker
/// the probe looks for.
pub static MAGIC: [u8; 8] = *b"MEI\x0c\x0b\x0a\x0b\x0e";

/// Serialized cookie length in bytes.
pub const COOKIE_LEN: usize = 88;

/// Fixed-length prefix of a TOC entry, before the entry name.
pub const TOC_ENTRY_HEADER_LEN: usize = 18;

const LIBNAME_LEN: usize = 64;

/// Trailing record describing the package as a whole.
///
/// The cookie sits at the very end of the package block. Locating it is how
/// a reader finds an embedded package inside an executable of otherwise
/// unknown layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    /// Total package length, cookie included.
    pub pkg_length: u32,

    /// Offset of the TOC from the start of the package.
    pub toc_offset: u32,

    /// TOC length in bytes.
    pub toc_length: u32,

    /// Python runtime version encoded as `100 * major + minor`.
    pub python_version: u32,

    /// File name of the Python shared library collected into the
    /// application root.
    pub python_libname: String,
}

impl Cookie {
    /// Parse a cookie from exactly [COOKIE_LEN] bytes.
    pub fn parse(data: &[u8]) -> ArchiveResult<Self> {
        if data.len() != COOKIE_LEN {
            return Err(Error::Format(format!(
                "cookie is {} bytes; expected {}",
                data.len(),
                COOKIE_LEN
            )));
        }

        let mut reader = Cursor::new(data);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::Format("bad cookie magic".to_string()));
        }

        let pkg_length = reader.read_u32::<BigEndian>()?;
        let toc_offset = reader.read_u32::<BigEndian>()?;
        let toc_length = reader.read_u32::<BigEndian>()?;
        let python_version = reader.read_u32::<BigEndian>()?;

        let mut libname = [0u8; LIBNAME_LEN];
        reader.read_exact(&mut libname)?;
        let nul = libname.iter().position(|&b| b == 0).unwrap_or(LIBNAME_LEN);
        let python_libname = String::from_utf8(libname[..nul].to_vec())
            .map_err(|_| Error::Format("python library name is not UTF-8".to_string()))?;

        if (pkg_length as usize) < COOKIE_LEN {
            return Err(Error::Format(
                "package length smaller than its own cookie".to_string(),
            ));
        }
        if toc_offset
            .checked_add(toc_length)
            .map_or(true, |end| end > pkg_length)
        {
            return Err(Error::Format(
                "TOC extends past the end of the package".to_string(),
            ));
        }

        Ok(Self {
            pkg_length,
            toc_offset,
            toc_length,
            python_version,
            python_libname,
        })
    }

    /// Serialize the cookie.
    pub fn write_to<W: Write>(&self, dest: &mut W) -> ArchiveResult<()> {
        if self.python_libname.len() >= LIBNAME_LEN {
            return Err(Error::Format(format!(
                "python library name {} exceeds {} bytes",
                self.python_libname,
                LIBNAME_LEN - 1
            )));
        }

        dest.write_all(&MAGIC)?;
        dest.write_u32::<BigEndian>(self.pkg_length)?;
        dest.write_u32::<BigEndian>(self.toc_offset)?;
        dest.write_u32::<BigEndian>(self.toc_length)?;
        dest.write_u32::<BigEndian>(self.python_version)?;

        let mut libname = [0u8; LIBNAME_LEN];
        libname[..self.python_libname.len()].copy_from_slice(self.python_libname.as_bytes());
        dest.write_all(&libname)?;

        Ok(())
    }
}

/// Type code of a TOC entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    /// Marshalled code object of a bootstrap module.
    PyModule,
    /// Marshalled code object of a bootstrap package `__init__`.
    PyPackage,
    /// The compressed importable module database.
    Pyz,
    /// Marshalled code object of a user entry-point script.
    Script,
    /// A shared library or other executable payload.
    Binary,
    /// An opaque data file.
    Data,
    /// A zip file (e.g. `base_library.zip`).
    Zipfile,
    /// A runtime option record; the name is the option text.
    RuntimeOption,
    /// Splash screen resources.
    Splash,
}

impl TryFrom<u8> for EntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'm' => Ok(Self::PyModule),
            b'M' => Ok(Self::PyPackage),
            b'z' => Ok(Self::Pyz),
            b's' => Ok(Self::Script),
            b'b' => Ok(Self::Binary),
            b'x' => Ok(Self::Data),
            b'Z' => Ok(Self::Zipfile),
            b'o' => Ok(Self::RuntimeOption),
            b'l' => Ok(Self::Splash),
            _ => Err(Error::Format(format!(
                "unknown TOC entry type code 0x{:02x}",
                value
            ))),
        }
    }
}

impl From<EntryType> for u8 {
    fn from(value: EntryType) -> Self {
        match value {
            EntryType::PyModule => b'm',
            EntryType::PyPackage => b'M',
            EntryType::Pyz => b'z',
            EntryType::Script => b's',
            EntryType::Binary => b'b',
            EntryType::Data => b'x',
            EntryType::Zipfile => b'Z',
            EntryType::RuntimeOption => b'o',
            EntryType::Splash => b'l',
        }
    }
}

impl EntryType {
    /// Whether entries of this type are materialized on the filesystem in
    /// single-file mode.
    pub fn is_extractable(&self) -> bool {
        matches!(
            self,
            Self::Binary | Self::Data | Self::Zipfile | Self::Splash
        )
    }
}

/// A parsed table-of-contents entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocEntry {
    /// Self-declared record length, name padding included.
    pub entry_length: u32,

    /// Payload offset from the start of the package.
    pub offset: u32,

    /// Payload length as stored.
    pub compressed_length: u32,

    /// Payload length after decompression.
    pub uncompressed_length: u32,

    /// Whether the payload is zlib-compressed.
    pub compressed: bool,

    /// Entry type.
    pub type_code: EntryType,

    /// Entry name: a module name, a relative path, or option text.
    pub name: String,
}

impl TocEntry {
    /// Parse one entry from the front of `data`.
    ///
    /// `data` is the remainder of the TOC buffer; the entry consumes
    /// exactly `entry_length` bytes of it.
    pub fn parse(data: &[u8]) -> ArchiveResult<Self> {
        if data.len() < TOC_ENTRY_HEADER_LEN {
            return Err(Error::Format(
                "TOC entry header truncated".to_string(),
            ));
        }

        let mut reader = Cursor::new(data);
        let entry_length = reader.read_u32::<BigEndian>()?;
        let offset = reader.read_u32::<BigEndian>()?;
        let compressed_length = reader.read_u32::<BigEndian>()?;
        let uncompressed_length = reader.read_u32::<BigEndian>()?;
        let compressed = match reader.read_u8()? {
            0 => false,
            1 => true,
            v => {
                return Err(Error::Format(format!(
                    "unknown compression flag {}",
                    v
                )))
            }
        };
        let type_code = EntryType::try_from(reader.read_u8()?)?;

        let entry_len = entry_length as usize;
        if entry_len < TOC_ENTRY_HEADER_LEN + 1 || entry_len > data.len() {
            return Err(Error::Format(format!(
                "TOC entry declares impossible length {}",
                entry_length
            )));
        }

        let name_field = &data[TOC_ENTRY_HEADER_LEN..entry_len];
        let nul = name_field
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Format("TOC entry name is not NUL-terminated".to_string()))?;
        let name = String::from_utf8(name_field[..nul].to_vec())
            .map_err(|_| Error::Format("TOC entry name is not UTF-8".to_string()))?;

        Ok(Self {
            entry_length,
            offset,
            compressed_length,
            uncompressed_length,
            compressed,
            type_code,
            name,
        })
    }

    /// Serialize this entry, padding the name so the record length is a
    /// multiple of 16.
    pub fn write_to<W: Write>(&self, dest: &mut W) -> ArchiveResult<()> {
        let record_length = Self::record_length(&self.name);

        dest.write_u32::<BigEndian>(record_length as u32)?;
        dest.write_u32::<BigEndian>(self.offset)?;
        dest.write_u32::<BigEndian>(self.compressed_length)?;
        dest.write_u32::<BigEndian>(self.uncompressed_length)?;
        dest.write_u8(u8::from(self.compressed))?;
        dest.write_u8(u8::from(self.type_code))?;
        dest.write_all(self.name.as_bytes())?;

        let padding = record_length - TOC_ENTRY_HEADER_LEN - self.name.len();
        dest.write_all(&vec![0u8; padding])?;

        Ok(())
    }

    /// Record length for an entry carrying `name`, NUL terminator and
    /// 16-byte padding included.
    pub fn record_length(name: &str) -> usize {
        let unpadded = TOC_ENTRY_HEADER_LEN + name.len() + 1;
        (unpadded + 15) / 16 * 16
    }
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn cookie_roundtrip() -> Result<()> {
        let cookie = Cookie {
            pkg_length: 4096,
            toc_offset: 1024,
            toc_length: 512,
            python_version: 312,
            python_libname: "libpython3.12.so.1.0".to_string(),
        };

        let mut data = Vec::new();
        cookie.write_to(&mut data)?;
        assert_eq!(data.len(), COOKIE_LEN);
        assert_eq!(Cookie::parse(&data)?, cookie);

        Ok(())
    }

    #[test]
    fn cookie_rejects_bad_magic() -> Result<()> {
        let cookie = Cookie {
            pkg_length: 4096,
            toc_offset: 0,
            toc_length: 0,
            python_version: 313,
            python_libname: "python313.dll".to_string(),
        };

        let mut data = Vec::new();
        cookie.write_to(&mut data)?;
        data[0] ^= 0xff;

        assert!(matches!(Cookie::parse(&data), Err(Error::Format(_))));

        Ok(())
    }

    #[test]
    fn cookie_rejects_toc_overrun() -> Result<()> {
        let cookie = Cookie {
            pkg_length: 256,
            toc_offset: 200,
            toc_length: 100,
            python_version: 311,
            python_libname: "libpython3.11.so.1.0".to_string(),
        };

        let mut data = Vec::new();
        cookie.write_to(&mut data)?;

        assert!(matches!(Cookie::parse(&data), Err(Error::Format(_))));

        Ok(())
    }

    #[test]
    fn entry_roundtrip_is_padded() -> Result<()> {
        let entry = TocEntry {
            entry_length: TocEntry::record_length("pyimod01_archive") as u32,
            offset: 88,
            compressed_length: 100,
            uncompressed_length: 300,
            compressed: true,
            type_code: EntryType::PyModule,
            name: "pyimod01_archive".to_string(),
        };

        let mut data = Vec::new();
        entry.write_to(&mut data)?;
        assert_eq!(data.len() % 16, 0);
        assert_eq!(TocEntry::parse(&data)?, entry);

        Ok(())
    }

    #[test]
    fn entry_requires_nul_terminated_name() {
        let mut data = vec![0u8; 32];
        data[3] = 32; // entry_length
        data[16] = 0; // stored
        data[17] = b'x'; // Data
        for b in data.iter_mut().skip(TOC_ENTRY_HEADER_LEN) {
            *b = b'a';
        }

        assert!(matches!(TocEntry::parse(&data), Err(Error::Format(_))));
    }

    #[test]
    fn extractable_types() {
        assert!(EntryType::Binary.is_extractable());
        assert!(EntryType::Data.is_extractable());
        assert!(EntryType::Zipfile.is_extractable());
        assert!(EntryType::Splash.is_extractable());
        assert!(!EntryType::PyModule.is_extractable());
        assert!(!EntryType::Pyz.is_extractable());
        assert!(!EntryType::RuntimeOption.is_extractable());
        assert!(!EntryType::Script.is_extractable());
    }
}
