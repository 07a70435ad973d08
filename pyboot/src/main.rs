// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod child;
mod context;
mod environment;
mod error;
mod message;
mod parent;
mod platform;
mod run;
mod splash;

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter("PYI_LOG_LEVEL")
            .write_style("PYI_LOG_STYLE"),
    )
    .init();

    let exit_code = match run::run() {
        Ok(code) => code,
        Err(e) => {
            message::fatal(&format!("{:#}", e));
            -1
        }
    };

    std::process::exit(exit_code);
}
