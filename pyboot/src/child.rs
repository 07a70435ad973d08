// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
The interpreter-running codepath (MAIN and SUBPROCESS roles): platform
preparation, splash for directory builds, dynamic interpreter binding,
and the launch itself.
*/

use {
    crate::{context::ProcessContext, environment, splash::SplashContext},
    anyhow::{Context, Result},
    pyboot_embed::{DynamicPythonLibrary, Launcher},
    std::ffi::OsString,
};

pub fn run(mut ctx: ProcessContext) -> Result<i32> {
    #[cfg(target_os = "macos")]
    if ctx.options.macos_argv_emulation {
        ctx.argv_rewritten = filter_psn_arguments(&ctx.argv);

        // Launch events are drained into the rewritten argv; the
        // activation event the pump consumed is replaced synthetically.
        crate::platform::darwin::install_event_handlers();
        crate::platform::darwin::pump_events();
        crate::platform::darwin::uninstall_event_handlers();
        crate::platform::darwin::submit_activation_event();
    }

    #[cfg(target_os = "linux")]
    if let Some(name) = std::env::var_os(environment::LINUX_PROCESS_NAME) {
        if let Err(e) = crate::platform::posix::set_process_name(&name) {
            log::warn!("could not set process name: {:#}", e);
        }
    }

    #[cfg(windows)]
    {
        use crate::context::HideConsoleMode;

        match ctx.options.hide_console {
            Some(mode @ (HideConsoleMode::HideLate | HideConsoleMode::MinimizeLate)) => {
                crate::platform::windows::apply_console_mode(mode)
            }
            _ => {}
        }
    }

    setup_splash(&mut ctx);

    let root = ctx.application_root()?.to_path_buf();
    let argv: Vec<OsString> = ctx.effective_argv().to_vec();

    let python = DynamicPythonLibrary::load(
        &root,
        ctx.archive.python_libname(),
        ctx.archive.python_version(),
    )
    .context("binding Python runtime")?;

    let exit_code = Launcher {
        archive: &mut ctx.archive,
        python: &python,
        executable: &ctx.executable,
        application_root: &root,
        argv: &argv,
        gil_disabled: ctx.options.gil_disabled,
        windowed: cfg!(feature = "windowed"),
        disable_windowed_traceback: ctx.options.disable_windowed_traceback,
    }
    .run()
    .context("running frozen application")?;

    // Splash set up by this process is torn down by this process.
    if let Some(mut splash) = ctx.splash.take() {
        splash.finalize();
    }

    Ok(exit_code)
}

/// Run the splash screen in directory mode; otherwise make sure the
/// in-interpreter splash module knows to no-op.
fn setup_splash(ctx: &mut ProcessContext) {
    if ctx.splash_eligible() {
        let root = match ctx.application_root() {
            Ok(root) => root.to_path_buf(),
            Err(_) => return,
        };

        // Directory builds ship splash resources on disk; no extraction.
        let mut splash = SplashContext::new();
        let result = splash
            .setup(&mut ctx.archive)
            .and_then(|_| splash.load_shared_libraries(&root))
            .and_then(|_| splash.start(&ctx.executable));

        match result {
            Ok(()) => ctx.splash = Some(splash),
            Err(e) => {
                log::warn!("splash screen unavailable: {:#}", e);
                std::env::set_var(environment::SPLASH_IPC, "0");
            }
        }

        return;
    }

    // A single-file MAIN inherits the parent's splash IPC channel and
    // must not clobber it; everything else (SUBPROCESS in particular)
    // suppresses the in-interpreter splash module.
    let inherited = ctx.single_file
        && ctx.level == crate::context::ProcessLevel::Main
        && std::env::var_os(environment::SPLASH_IPC).is_some();

    if !inherited {
        std::env::set_var(environment::SPLASH_IPC, "0");
    }
}

/// Drop Finder's `-psn_…` process serial number argument, producing the
/// rewritten argv when anything was removed.
#[allow(dead_code)]
fn filter_psn_arguments(argv: &[OsString]) -> Option<Vec<OsString>> {
    let filtered: Vec<OsString> = argv
        .iter()
        .filter(|arg| !arg.to_string_lossy().starts_with("-psn_"))
        .cloned()
        .collect();

    if filtered.len() == argv.len() {
        None
    } else {
        Some(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psn_argument_is_filtered() {
        let argv = vec![
            OsString::from("/Applications/Demo.app/Contents/MacOS/run"),
            OsString::from("-psn_0_12345"),
            OsString::from("--flag"),
        ];

        let rewritten = filter_psn_arguments(&argv).expect("psn argument present");
        assert_eq!(
            rewritten,
            vec![
                OsString::from("/Applications/Demo.app/Contents/MacOS/run"),
                OsString::from("--flag"),
            ]
        );
    }

    #[test]
    fn argv_without_psn_is_not_rewritten() {
        let argv = vec![OsString::from("./run"), OsString::from("input.txt")];

        assert_eq!(filter_psn_arguments(&argv), None);
    }
}
