// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Control a dynamically loaded embedded Python interpreter.

Unlike embedding crates that link against a `libpython` chosen at build
time, this crate binds the interpreter at *runtime*: the collected Python
shared library is `dlopen`'d from the application root, its version is only
known from the package cookie, and configuration goes through whichever of
the two embedding protocols the library exposes — the PEP 741 named-setter
API when available, the PEP 587 `PyConfig` structures otherwise. The PEP
587 path writes fields through per-version layout descriptors because that
structure has no stable in-memory layout across minor releases.
*/

pub mod configurator;
pub mod dynlib;
pub mod error;
pub mod ffi;
pub mod launcher;
pub mod layout;
pub mod options;
pub mod pystr;

pub use crate::{
    configurator::{module_search_paths, Configurator},
    dynlib::DynamicPythonLibrary,
    error::EmbedError,
    launcher::Launcher,
    options::RuntimeOptions,
};
