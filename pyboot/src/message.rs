// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Fatal-error surface.

Each failure is reported on exactly one channel: stderr on console
builds; a message box (win32) or syslog (POSIX) on windowed builds, which
have no usable stderr.
*/

#[cfg(not(feature = "windowed"))]
pub fn fatal(message: &str) {
    eprintln!("error: {}", message);
}

#[cfg(all(feature = "windowed", windows))]
pub fn fatal(message: &str) {
    use {
        std::{ffi::OsStr, os::windows::ffi::OsStrExt},
        winapi::um::winuser::{MessageBoxW, MB_ICONERROR, MB_OK},
    };

    let wide = |s: &str| -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    };

    let text = wide(message);
    let caption = wide("Application startup failure");

    unsafe {
        MessageBoxW(
            std::ptr::null_mut(),
            text.as_ptr(),
            caption.as_ptr(),
            MB_OK | MB_ICONERROR,
        );
    }
}

#[cfg(all(feature = "windowed", unix))]
pub fn fatal(message: &str) {
    use std::ffi::CString;

    let format = CString::new("%s").expect("static format string");

    if let Ok(text) = CString::new(message) {
        unsafe {
            libc::syslog(libc::LOG_ERR, format.as_ptr(), text.as_ptr());
        }
    }
}
