// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! win32 process, window, console, and security primitives. */

use {
    crate::{
        context::{HideConsoleMode, ASYNC_STATE},
        error::BootError,
    },
    anyhow::Result,
    std::{
        ffi::{OsStr, OsString},
        os::windows::ffi::{OsStrExt, OsStringExt},
        path::{Path, PathBuf},
    },
    winapi::{
        shared::{
            minwindef::{BOOL, DWORD, FALSE, LPARAM, LRESULT, TRUE, UINT, WPARAM},
            sddl::{
                ConvertSidToStringSidW, ConvertStringSecurityDescriptorToSecurityDescriptorW,
                SDDL_REVISION_1,
            },
            windef::HWND,
            winerror::ERROR_ALREADY_EXISTS,
        },
        um::{
            consoleapi::SetConsoleCtrlHandler,
            errhandlingapi::GetLastError,
            fileapi::CreateDirectoryW,
            handleapi::CloseHandle,
            libloaderapi::{GetModuleFileNameW, GetModuleHandleW},
            minwinbase::SECURITY_ATTRIBUTES,
            processthreadsapi::{
                CreateProcessW, GetCurrentProcess, GetCurrentProcessId, GetExitCodeProcess,
                OpenProcessToken, TerminateProcess, PROCESS_INFORMATION, STARTUPINFOW,
            },
            securitybaseapi::GetTokenInformation,
            winbase::{GetCommandLineW, LocalFree, SetDllDirectoryW, INFINITE, WAIT_OBJECT_0},
            wincon::GetConsoleWindow,
            winnt::{TokenUser, HANDLE, TOKEN_QUERY, TOKEN_USER},
            winuser::{
                CreateWindowExW, DefWindowProcW, DispatchMessageW, GetMessageW,
                MsgWaitForMultipleObjects, PeekMessageW, PostMessageW, RegisterClassExW,
                ShowWindow, TranslateMessage, MSG, PM_REMOVE, QS_ALLINPUT, SW_HIDE, SW_MINIMIZE,
                WM_ENDSESSION, WM_QUERYENDSESSION, WNDCLASSEXW,
            },
        },
    },
};

/// NUL-terminated UTF-16 copy of an OS string.
fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

fn last_error(context: &str) -> BootError {
    BootError::PlatformFailure(format!("{}: error {}", context, unsafe { GetLastError() }))
}

/// Resolve the executable via the loader, growing the buffer until the
/// whole path fits.
pub fn resolve_executable() -> Result<PathBuf> {
    let mut buffer: Vec<u16> = vec![0; 260];

    loop {
        let len = unsafe {
            GetModuleFileNameW(
                std::ptr::null_mut(),
                buffer.as_mut_ptr(),
                buffer.len() as DWORD,
            )
        } as usize;

        if len == 0 {
            return Err(last_error("GetModuleFileNameW").into());
        }
        if len < buffer.len() {
            buffer.truncate(len);
            break;
        }

        buffer.resize(buffer.len() * 2, 0);
    }

    let path = PathBuf::from(OsString::from_wide(&buffer));

    Ok(dunce::canonicalize(&path).unwrap_or(path))
}

/// Point the per-process DLL search at the application root.
pub fn set_dll_search_path(root: &Path) -> Result<()> {
    let root_w = wide(root.as_os_str());

    if unsafe { SetDllDirectoryW(root_w.as_ptr()) } == 0 {
        return Err(last_error("SetDllDirectoryW").into());
    }

    Ok(())
}

/// Owner-only security state applied to the created temp directory.
///
/// Held in the process context until extraction finishes, then released.
pub struct RestrictedAcl {
    descriptor: *mut winapi::ctypes::c_void,
}

impl Drop for RestrictedAcl {
    fn drop(&mut self) {
        if !self.descriptor.is_null() {
            unsafe {
                LocalFree(self.descriptor);
            }
        }
    }
}

/// String SID of the current process user, e.g. `S-1-5-21-…`.
fn current_user_sid() -> Result<String> {
    unsafe {
        let mut token: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return Err(last_error("OpenProcessToken").into());
        }

        let mut needed: DWORD = 0;
        GetTokenInformation(token, TokenUser, std::ptr::null_mut(), 0, &mut needed);

        let mut buffer = vec![0u8; needed as usize];
        let ok = GetTokenInformation(
            token,
            TokenUser,
            buffer.as_mut_ptr() as *mut _,
            needed,
            &mut needed,
        );
        CloseHandle(token);
        if ok == 0 {
            return Err(last_error("GetTokenInformation").into());
        }

        let token_user = &*(buffer.as_ptr() as *const TOKEN_USER);

        let mut sid_w: *mut u16 = std::ptr::null_mut();
        if ConvertSidToStringSidW(token_user.User.Sid, &mut sid_w) == 0 {
            return Err(last_error("ConvertSidToStringSidW").into());
        }

        let mut len = 0;
        while *sid_w.add(len) != 0 {
            len += 1;
        }
        let sid = String::from_utf16_lossy(std::slice::from_raw_parts(sid_w, len));
        LocalFree(sid_w as *mut _);

        Ok(sid)
    }
}

/// Create the ephemeral application directory with an owner-only DACL.
pub fn create_restricted_directory(base: &Path) -> Result<(PathBuf, RestrictedAcl)> {
    let sid = current_user_sid()?;
    let sddl = format!("D:P(A;OICI;FA;;;{})", sid);
    let sddl_w = wide(OsStr::new(&sddl));

    let mut descriptor: *mut winapi::ctypes::c_void = std::ptr::null_mut();
    if unsafe {
        ConvertStringSecurityDescriptorToSecurityDescriptorW(
            sddl_w.as_ptr(),
            SDDL_REVISION_1 as DWORD,
            &mut descriptor,
            std::ptr::null_mut(),
        )
    } == 0
    {
        return Err(last_error("building security descriptor").into());
    }

    let acl = RestrictedAcl { descriptor };

    let mut attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as DWORD,
        lpSecurityDescriptor: acl.descriptor,
        bInheritHandle: FALSE,
    };

    let pid = unsafe { GetCurrentProcessId() };
    for attempt in 0..100u32 {
        let name = format!("_MEI{:06}", (pid.wrapping_add(attempt * 7)) % 1_000_000);
        let path = base.join(name);
        let path_w = wide(path.as_os_str());

        if unsafe { CreateDirectoryW(path_w.as_ptr(), &mut attributes) } != 0 {
            return Ok((path, acl));
        }
        if unsafe { GetLastError() } != ERROR_ALREADY_EXISTS {
            return Err(last_error("CreateDirectoryW").into());
        }
    }

    Err(BootError::PlatformFailure(format!(
        "could not create a fresh _MEI directory under {}",
        base.display()
    ))
    .into())
}

/// Hide or minimize the console window owning this process.
pub fn apply_console_mode(mode: HideConsoleMode) {
    let console = unsafe { GetConsoleWindow() };
    if console.is_null() {
        return;
    }

    let command = match mode {
        HideConsoleMode::HideEarly | HideConsoleMode::HideLate => SW_HIDE,
        HideConsoleMode::MinimizeEarly | HideConsoleMode::MinimizeLate => SW_MINIMIZE,
    };

    unsafe {
        ShowWindow(console, command);
    }
}

/// Pump one zero message through the GUI queue. Dismisses the OS
/// "application starting" cursor on windowed builds.
pub fn dismiss_startup_cursor() {
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        PostMessageW(std::ptr::null_mut(), 0, 0, 0);
        GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0);
    }
}

/// An owned handle on the spawned child process.
pub struct ChildProcess {
    process: HANDLE,
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.process);
        }
    }
}

/// Spawn the child with our own executable and the original command line.
pub fn spawn_child() -> Result<ChildProcess> {
    unsafe {
        let mut startup: STARTUPINFOW = std::mem::zeroed();
        startup.cb = std::mem::size_of::<STARTUPINFOW>() as DWORD;
        let mut info: PROCESS_INFORMATION = std::mem::zeroed();

        if CreateProcessW(
            std::ptr::null(),
            GetCommandLineW(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            TRUE,
            0,
            std::ptr::null_mut(),
            std::ptr::null(),
            &mut startup,
            &mut info,
        ) == 0
        {
            return Err(BootError::ChildSpawnFailure(format!(
                "CreateProcessW: error {}",
                GetLastError()
            ))
            .into());
        }

        CloseHandle(info.hThread);
        log::debug!("spawned child process {}", info.dwProcessId);

        Ok(ChildProcess {
            process: info.hProcess,
        })
    }
}

unsafe extern "system" fn console_ctrl_handler(_ctrl_type: DWORD) -> BOOL {
    // Written from the console control thread; the waiter observes it.
    ASYNC_STATE.request_shutdown();
    TRUE
}

/// Record console control events in the async-set record.
pub fn install_console_handler() {
    unsafe {
        SetConsoleCtrlHandler(Some(console_ctrl_handler), TRUE);
    }
}

unsafe extern "system" fn shutdown_wndproc(
    hwnd: HWND,
    msg: UINT,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_QUERYENDSESSION => TRUE as LRESULT,
        WM_ENDSESSION => {
            if wparam != 0 {
                ASYNC_STATE.request_shutdown();
            }
            0
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Create the invisible top-level window that receives session-end
/// messages while the parent waits.
pub fn create_shutdown_window() -> Result<()> {
    let class_name = wide(OsStr::new("pyboot-shutdown"));

    unsafe {
        let mut class: WNDCLASSEXW = std::mem::zeroed();
        class.cbSize = std::mem::size_of::<WNDCLASSEXW>() as UINT;
        class.lpfnWndProc = Some(shutdown_wndproc);
        class.hInstance = GetModuleHandleW(std::ptr::null());
        class.lpszClassName = class_name.as_ptr();

        if RegisterClassExW(&class) == 0 {
            return Err(last_error("RegisterClassExW").into());
        }

        let hwnd = CreateWindowExW(
            0,
            class_name.as_ptr(),
            class_name.as_ptr(),
            0,
            0,
            0,
            0,
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            class.hInstance,
            std::ptr::null_mut(),
        );
        if hwnd.is_null() {
            return Err(last_error("CreateWindowExW").into());
        }
    }

    Ok(())
}

fn pump_messages() {
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        while PeekMessageW(&mut msg, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

/// Wait for the child, pumping window messages so session-end events are
/// delivered. A recorded shutdown terminates the child and short-circuits
/// into the common cleanup path.
pub fn wait_for_child(child: &ChildProcess) -> Result<super::ChildExit> {
    loop {
        let rc = unsafe {
            MsgWaitForMultipleObjects(1, &child.process, FALSE, INFINITE, QS_ALLINPUT)
        };

        if rc == WAIT_OBJECT_0 {
            break;
        } else if rc == WAIT_OBJECT_0 + 1 {
            pump_messages();
            if ASYNC_STATE.shutdown_requested() {
                log::debug!("session shutdown observed; terminating child");
                unsafe {
                    TerminateProcess(child.process, 255);
                }
            }
        } else {
            return Err(last_error("MsgWaitForMultipleObjects").into());
        }
    }

    let mut code: DWORD = 0;
    if unsafe { GetExitCodeProcess(child.process, &mut code) } == 0 {
        return Err(last_error("GetExitCodeProcess").into());
    }

    Ok(super::ChildExit::Code(code as i32))
}

/// Cleanup mitigation: drop read-only attributes under `root` so a retry
/// of the recursive delete can succeed.
pub fn clear_readonly_attributes(root: &Path) {
    fn visit(dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if let Ok(metadata) = entry.metadata() {
                let mut permissions = metadata.permissions();
                if permissions.readonly() {
                    permissions.set_readonly(false);
                    let _ = std::fs::set_permissions(&path, permissions);
                }
                if metadata.is_dir() {
                    visit(&path);
                }
            }
        }
    }

    visit(root);
}
