// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
C ABI types shared by both embedding protocols.

Only structures with a stable layout since CPython 3.8 are declared here as
`repr(C)` mirrors: `PyPreConfig` (modulo the windows-only field, which the
conditional compilation below accounts for) and `PyStatus`. The `PyConfig`
structure is *not* mirrored — its layout varies per minor release and is
described by [crate::layout] descriptors instead.
*/

use std::os::raw::{c_char, c_int, c_ulong, c_void};

#[allow(non_camel_case_types)]
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
pub type wchar_t = u32;

#[allow(non_camel_case_types)]
#[cfg(all(
    target_family = "unix",
    not(all(target_arch = "aarch64", target_os = "linux"))
))]
pub type wchar_t = i32;

#[allow(non_camel_case_types)]
#[cfg(target_family = "windows")]
pub type wchar_t = u16;

#[allow(non_camel_case_types)]
pub type Py_ssize_t = isize;

/// Opaque Python object pointer.
#[repr(C)]
pub struct PyObject {
    _private: [u8; 0],
}

/// Mirror of `PyPreConfig`.
#[repr(C)]
#[derive(Debug)]
pub struct PyPreConfig {
    pub _config_init: c_int,
    pub parse_argv: c_int,
    pub isolated: c_int,
    pub use_environment: c_int,
    pub configure_locale: c_int,
    pub coerce_c_locale: c_int,
    pub coerce_c_locale_warn: c_int,
    #[cfg(windows)]
    pub legacy_windows_fs_encoding: c_int,
    pub utf8_mode: c_int,
    pub dev_mode: c_int,
    pub allocator: c_int,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
#[allow(non_camel_case_types, clippy::enum_variant_names)]
pub enum _PyStatus_TYPE {
    _PyStatus_TYPE_OK,
    _PyStatus_TYPE_ERROR,
    _PyStatus_TYPE_EXIT,
}

/// Mirror of `PyStatus`.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PyStatus {
    pub _type: _PyStatus_TYPE,
    pub func: *const c_char,
    pub err_msg: *const c_char,
    pub exitcode: c_int,
}

impl PyStatus {
    /// Render the status for error reporting, in the manner of
    /// `PyStatus_Exception` consumers.
    pub fn describe(&self, context: &str) -> String {
        let func = unsafe { cstr_lossy(self.func) };
        let msg = unsafe { cstr_lossy(self.err_msg) };

        match (func, msg) {
            (Some(func), Some(msg)) => format!("during {}: {}: {}", context, func, msg),
            (None, Some(msg)) => format!("during {}: {}", context, msg),
            _ => format!("during {}: could not format PyStatus", context),
        }
    }
}

unsafe fn cstr_lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(
            std::ffi::CStr::from_ptr(ptr)
                .to_string_lossy()
                .into_owned(),
        )
    }
}

// Signatures bound from the shared library. Grouped by protocol; see
// [crate::dynlib] for which group is resolved when.

pub type Py_PreInitializeFn = unsafe extern "C" fn(*const PyPreConfig) -> PyStatus;
pub type PyPreConfig_InitIsolatedConfigFn = unsafe extern "C" fn(*mut PyPreConfig);
pub type PyStatus_ExceptionFn = unsafe extern "C" fn(PyStatus) -> c_int;

pub type PyConfig_InitIsolatedConfigFn = unsafe extern "C" fn(*mut c_void);
pub type PyConfig_SetBytesStringFn =
    unsafe extern "C" fn(*mut c_void, *mut *mut wchar_t, *const c_char) -> PyStatus;
pub type PyConfig_SetStringFn =
    unsafe extern "C" fn(*mut c_void, *mut *mut wchar_t, *const wchar_t) -> PyStatus;
pub type PyConfig_SetBytesArgvFn =
    unsafe extern "C" fn(*mut c_void, Py_ssize_t, *const *mut c_char) -> PyStatus;
pub type PyConfig_SetArgvFn =
    unsafe extern "C" fn(*mut c_void, Py_ssize_t, *const *mut wchar_t) -> PyStatus;
pub type PyConfig_SetWideStringListFn =
    unsafe extern "C" fn(*mut c_void, *mut c_void, Py_ssize_t, *const *mut wchar_t) -> PyStatus;
pub type PyConfig_ReadFn = unsafe extern "C" fn(*mut c_void) -> PyStatus;
pub type PyConfig_ClearFn = unsafe extern "C" fn(*mut c_void);
pub type Py_InitializeFromConfigFn = unsafe extern "C" fn(*const c_void) -> PyStatus;

pub type PyInitConfig_CreateFn = unsafe extern "C" fn() -> *mut c_void;
pub type PyInitConfig_FreeFn = unsafe extern "C" fn(*mut c_void);
pub type PyInitConfig_SetIntFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, i64) -> c_int;
pub type PyInitConfig_SetStrFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> c_int;
pub type PyInitConfig_SetStrListFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, usize, *const *const c_char) -> c_int;
pub type PyInitConfig_GetErrorFn =
    unsafe extern "C" fn(*mut c_void, *mut *const c_char) -> c_int;
pub type Py_InitializeFromInitConfigFn = unsafe extern "C" fn(*mut c_void) -> c_int;

pub type PyImport_AddModuleFn = unsafe extern "C" fn(*const c_char) -> *mut PyObject;
pub type PyImport_ImportModuleFn = unsafe extern "C" fn(*const c_char) -> *mut PyObject;
pub type PyImport_ExecCodeModuleFn =
    unsafe extern "C" fn(*const c_char, *mut PyObject) -> *mut PyObject;
pub type PyMarshal_ReadObjectFromStringFn =
    unsafe extern "C" fn(*const c_char, Py_ssize_t) -> *mut PyObject;
pub type PyModule_GetDictFn = unsafe extern "C" fn(*mut PyObject) -> *mut PyObject;
pub type PyEval_EvalCodeFn =
    unsafe extern "C" fn(*mut PyObject, *mut PyObject, *mut PyObject) -> *mut PyObject;
pub type PySys_GetObjectFn = unsafe extern "C" fn(*const c_char) -> *mut PyObject;
pub type PySys_SetObjectFn = unsafe extern "C" fn(*const c_char, *mut PyObject) -> c_int;
pub type PyUnicode_FromStringFn = unsafe extern "C" fn(*const c_char) -> *mut PyObject;
pub type PyUnicode_DecodeFSDefaultFn = unsafe extern "C" fn(*const c_char) -> *mut PyObject;
pub type PyErr_OccurredFn = unsafe extern "C" fn() -> *mut PyObject;
pub type PyErr_PrintFn = unsafe extern "C" fn();
pub type PyErr_ClearFn = unsafe extern "C" fn();
pub type PyRun_SimpleStringFlagsFn =
    unsafe extern "C" fn(*const c_char, *mut c_void) -> c_int;
pub type Py_DecRefFn = unsafe extern "C" fn(*mut PyObject);
pub type Py_FinalizeExFn = unsafe extern "C" fn() -> c_int;

// Layout units used by the descriptor walk in [crate::layout].
pub const INT_SIZE: usize = std::mem::size_of::<c_int>();
pub const ULONG_SIZE: usize = std::mem::size_of::<c_ulong>();
pub const POINTER_SIZE: usize = std::mem::size_of::<*const c_void>();
/// `PyWideStringList` is `{ Py_ssize_t length; wchar_t **items; }`.
pub const WIDE_LIST_SIZE: usize = 2 * POINTER_SIZE;
