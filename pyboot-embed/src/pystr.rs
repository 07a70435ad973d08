// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Bridge OS string types to the representations the embedding ABI wants.

Three string worlds interoperate here: windows wide strings, POSIX
locale-encoded bytes, and the PEP 741 protocol's UTF-8. Components outside
this module never touch encoding directly.
*/

use {
    crate::error::EmbedError,
    std::{
        ffi::{CString, OsStr},
        path::Path,
    },
    widestring::WideCString,
};

#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStrExt;

/// Encode an OS string as a byte C string.
///
/// On POSIX this passes the raw locale-encoded bytes through; the
/// receiving `PyConfig_SetBytes*` functions decode them with
/// `Py_DecodeLocale` semantics.
#[cfg(target_family = "unix")]
pub fn cstring_from_osstr(s: &OsStr) -> Result<CString, EmbedError> {
    CString::new(s.as_bytes())
        .map_err(|_| EmbedError::ConfigFailure(format!("embedded NUL in {:?}", s)))
}

/// Encode an OS string as a byte C string.
///
/// Windows OS strings are UTF-16; the byte form is only used for UTF-8
/// clean values.
#[cfg(target_family = "windows")]
pub fn cstring_from_osstr(s: &OsStr) -> Result<CString, EmbedError> {
    let value = s
        .to_str()
        .ok_or_else(|| EmbedError::ConfigFailure(format!("{:?} is not valid UTF-8", s)))?;

    CString::new(value)
        .map_err(|_| EmbedError::ConfigFailure(format!("embedded NUL in {:?}", s)))
}

pub fn cstring_from_path(path: &Path) -> Result<CString, EmbedError> {
    cstring_from_osstr(path.as_os_str())
}

/// Encode an OS string as a wide C string.
#[cfg(target_family = "unix")]
pub fn widecstring_from_osstr(s: &OsStr) -> Result<WideCString, EmbedError> {
    let value = s
        .to_str()
        .ok_or_else(|| EmbedError::ConfigFailure(format!("{:?} is not valid UTF-8", s)))?;

    WideCString::from_str(value)
        .map_err(|_| EmbedError::ConfigFailure(format!("embedded NUL in {:?}", s)))
}

/// Encode an OS string as a wide C string.
#[cfg(target_family = "windows")]
pub fn widecstring_from_osstr(s: &OsStr) -> Result<WideCString, EmbedError> {
    WideCString::from_os_str(s)
        .map_err(|_| EmbedError::ConfigFailure(format!("embedded NUL in {:?}", s)))
}

pub fn widecstring_from_path(path: &Path) -> Result<WideCString, EmbedError> {
    widecstring_from_osstr(path.as_os_str())
}

/// Encode a UTF-8 string for the PEP 741 named setters.
pub fn cstring_from_str(s: &str) -> Result<CString, EmbedError> {
    CString::new(s).map_err(|_| EmbedError::ConfigFailure(format!("embedded NUL in {:?}", s)))
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result, std::ffi::OsString};

    #[test]
    fn plain_strings_convert_both_ways() -> Result<()> {
        let value = OsString::from("application");

        assert_eq!(cstring_from_osstr(&value)?.as_bytes(), b"application");
        assert_eq!(
            widecstring_from_osstr(&value)?,
            WideCString::from_str("application")?
        );

        Ok(())
    }

    #[test]
    fn interior_nul_is_rejected() {
        let value = OsString::from("app\0lication");

        assert!(cstring_from_osstr(&value).is_err());
        assert!(widecstring_from_osstr(&value).is_err());
    }
}
