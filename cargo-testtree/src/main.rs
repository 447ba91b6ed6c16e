// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod dispatch;
mod output;

use clap::Parser;
use color_eyre::Result;
use dispatch::TesttreeApp;

fn main() -> Result<()> {
    color_eyre::install()?;

    let app = TesttreeApp::parse();
    match app.exec() {
        Ok(code) => std::process::exit(code),
        Err(error) => Err(error),
    }
}
