// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Start the interpreter and run the frozen application.

The launcher owns the interpreter-facing half of the main/subprocess
codepath: pre-init, configuration, start, publishing `sys._MEIPASS` and the
PYZ offset hint, importing the bootstrap code objects from the TOC, running
the user entry-point scripts, and finalization.
*/

use {
    crate::{
        configurator::Configurator,
        dynlib::DynamicPythonLibrary,
        error::EmbedError,
        ffi::{PyObject, Py_ssize_t},
        options::RuntimeOptions,
        pystr,
    },
    pyboot_archive::{Archive, EntryType, TocEntry},
    std::{
        ffi::{CString, OsString},
        os::raw::c_char,
        path::Path,
    },
};

/// One run of the embedded interpreter.
pub struct Launcher<'a> {
    pub archive: &'a mut Archive,
    pub python: &'a DynamicPythonLibrary,
    /// Path of the bootloader executable; becomes the program name.
    pub executable: &'a Path,
    /// The resolved application root (`sys._MEIPASS`).
    pub application_root: &'a Path,
    /// Arguments for `sys.argv`: the rewritten copy when one exists,
    /// otherwise the original process arguments.
    pub argv: &'a [OsString],
    pub gil_disabled: bool,
    pub windowed: bool,
    pub disable_windowed_traceback: bool,
}

impl<'a> Launcher<'a> {
    /// Configure and start the interpreter, run the application, finalize.
    ///
    /// Returns the process exit code.
    pub fn run(mut self) -> Result<i32, EmbedError> {
        let options =
            RuntimeOptions::from_archive(self.archive, !self.python.uses_init_config())?;

        let configurator = Configurator::new(self.python, self.gil_disabled)?;
        configurator.pre_initialize(&options)?;

        let mut config = configurator.into_config()?;
        config.set_program_name(self.executable)?;
        config.set_python_home(self.application_root)?;
        config.set_module_search_paths(self.application_root, self.python.version())?;
        config.set_argv(self.argv)?;
        config.set_runtime_options(&options)?;
        config.initialize()?;

        log::debug!("interpreter started");

        self.publish_application_root()?;

        let entries = self
            .archive
            .entries()
            .collect::<Result<Vec<_>, _>>()
            .map_err(EmbedError::from)?;

        self.publish_pyz_hint(&entries)?;
        self.import_bootstrap_modules(&entries)?;
        let exit_code = self.run_scripts(&entries)?;

        self.flush_streams();
        self.finalize();

        Ok(exit_code)
    }

    /// Set `sys._MEIPASS` to the application root.
    fn publish_application_root(&self) -> Result<(), EmbedError> {
        let symbols = self.python.common();
        let root = pystr::cstring_from_path(self.application_root)?;

        unsafe {
            let value = (symbols.PyUnicode_DecodeFSDefault)(root.as_ptr());
            if value.is_null() {
                (symbols.PyErr_Print)();
                return Err(EmbedError::Bootstrap(
                    "decoding application root".to_string(),
                ));
            }

            let result = (symbols.PySys_SetObject)(b"_MEIPASS\0".as_ptr() as *const c_char, value);
            (symbols.Py_DecRef)(value);
            if result != 0 {
                return Err(EmbedError::Bootstrap("setting sys._MEIPASS".to_string()));
            }
        }

        Ok(())
    }

    /// Publish the `"<archive-path>?<absolute-offset>"` hint so the
    /// in-interpreter importer can locate the PYZ without re-scanning.
    fn publish_pyz_hint(&self, entries: &[TocEntry]) -> Result<(), EmbedError> {
        let pyz = match entries
            .iter()
            .find(|entry| entry.type_code == EntryType::Pyz)
        {
            Some(entry) => entry,
            None => {
                log::warn!("archive carries no PYZ entry");
                return Ok(());
            }
        };

        let hint = pyz_hint(
            self.archive.path(),
            self.archive.pkg_offset() + u64::from(pyz.offset),
        )?;

        let symbols = self.python.common();
        unsafe {
            let value = (symbols.PyUnicode_DecodeFSDefault)(hint.as_ptr());
            if value.is_null() {
                (symbols.PyErr_Print)();
                return Err(EmbedError::Bootstrap("decoding PYZ hint".to_string()));
            }

            let result =
                (symbols.PySys_SetObject)(b"_pyinstaller_pyz\0".as_ptr() as *const c_char, value);
            (symbols.Py_DecRef)(value);
            if result != 0 {
                return Err(EmbedError::Bootstrap(
                    "setting sys._pyinstaller_pyz".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Import every PYMODULE/PYPACKAGE entry under the entry's name.
    ///
    /// The first failing import aborts; no recovery is attempted.
    fn import_bootstrap_modules(&mut self, entries: &[TocEntry]) -> Result<(), EmbedError> {
        for entry in entries {
            if !matches!(
                entry.type_code,
                EntryType::PyModule | EntryType::PyPackage
            ) {
                continue;
            }

            log::debug!("importing bootstrap module {}", entry.name);

            let data = self.archive.extract(entry)?;
            let symbols = self.python.common();
            let name = CString::new(entry.name.as_str()).map_err(|_| {
                EmbedError::Bootstrap(format!("module name {:?} contains NUL", entry.name))
            })?;

            unsafe {
                let code = (symbols.PyMarshal_ReadObjectFromString)(
                    data.as_ptr() as *const c_char,
                    data.len() as Py_ssize_t,
                );
                if code.is_null() {
                    (symbols.PyErr_Print)();
                    return Err(EmbedError::Bootstrap(format!(
                        "unmarshalling code object for {}",
                        entry.name
                    )));
                }

                let module = (symbols.PyImport_ExecCodeModule)(name.as_ptr(), code);
                (symbols.Py_DecRef)(code);
                if module.is_null() {
                    (symbols.PyErr_Print)();
                    return Err(EmbedError::Bootstrap(format!(
                        "executing bootstrap module {}",
                        entry.name
                    )));
                }
                (symbols.Py_DecRef)(module);
            }
        }

        Ok(())
    }

    /// Execute the user entry-point scripts in `__main__`, in TOC order.
    fn run_scripts(&mut self, entries: &[TocEntry]) -> Result<i32, EmbedError> {
        let symbols = self.python.common();

        let main_dict = unsafe {
            // Borrowed references; __main__ lives for the interpreter.
            let main_module =
                (symbols.PyImport_AddModule)(b"__main__\0".as_ptr() as *const c_char);
            if main_module.is_null() {
                (symbols.PyErr_Print)();
                return Err(EmbedError::Bootstrap("obtaining __main__".to_string()));
            }
            (symbols.PyModule_GetDict)(main_module)
        };

        for entry in entries {
            if entry.type_code != EntryType::Script {
                continue;
            }

            log::debug!("running script {}", entry.name);

            let data = self.archive.extract(entry)?;
            let symbols = self.python.common();

            unsafe {
                let code = (symbols.PyMarshal_ReadObjectFromString)(
                    data.as_ptr() as *const c_char,
                    data.len() as Py_ssize_t,
                );
                if code.is_null() {
                    (symbols.PyErr_Print)();
                    return Err(EmbedError::Bootstrap(format!(
                        "unmarshalling code object for script {}",
                        entry.name
                    )));
                }

                let result: *mut PyObject =
                    (symbols.PyEval_EvalCode)(code, main_dict, main_dict);
                (symbols.Py_DecRef)(code);

                if result.is_null() {
                    if self.windowed && self.disable_windowed_traceback {
                        (symbols.PyErr_Clear)();
                    } else {
                        (symbols.PyErr_Print)();
                    }
                    return Ok(1);
                }
                (symbols.Py_DecRef)(result);
            }
        }

        Ok(0)
    }

    /// Flush the interpreter's text streams. Skipped on windowed builds,
    /// which have no usable stdio.
    fn flush_streams(&self) {
        if self.windowed {
            return;
        }

        let symbols = self.python.common();
        let script = b"import sys\n\
            if sys.stdout is not None:\n    sys.stdout.flush()\n\
            if sys.stderr is not None:\n    sys.stderr.flush()\n\0";

        unsafe {
            if (symbols.PyRun_SimpleStringFlags)(
                script.as_ptr() as *const c_char,
                std::ptr::null_mut(),
            ) != 0
            {
                log::warn!("failed to flush interpreter streams");
            }
        }
    }

    fn finalize(&self) {
        let symbols = self.python.common();

        if unsafe { (symbols.Py_FinalizeEx)() } != 0 {
            log::warn!("errors while finalizing interpreter");
        }
    }
}

/// Build the NUL-terminated `"<path>?<offset>"` PYZ hint.
fn pyz_hint(archive_path: &Path, absolute_offset: u64) -> Result<CString, EmbedError> {
    let path = pystr::cstring_from_path(archive_path)?;

    let mut bytes = path.into_bytes();
    bytes.push(b'?');
    bytes.extend_from_slice(absolute_offset.to_string().as_bytes());

    CString::new(bytes)
        .map_err(|_| EmbedError::Bootstrap("building PYZ hint".to_string()))
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result};

    #[test]
    fn pyz_hint_is_path_question_mark_offset() -> Result<()> {
        let hint = pyz_hint(Path::new("/opt/app/run"), 10_088)?;
        assert_eq!(hint.as_bytes(), b"/opt/app/run?10088");

        Ok(())
    }

    #[test]
    fn pyz_hint_offset_zero_for_sideload() -> Result<()> {
        let hint = pyz_hint(Path::new("run.pkg"), 0)?;
        assert_eq!(hint.as_bytes(), b"run.pkg?0");

        Ok(())
    }
}
