// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use owo_colors::Style;
use std::io::IsTerminal;
use tracing_subscriber::filter::LevelFilter;

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "TESTTREE_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "CARGO_TERM_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    /// Installs the log subscriber and returns the styles to render with.
    pub(crate) fn init(self) -> Styles {
        let level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        // Logs go to stderr so they never interleave with the tree output.
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();

        let mut styles = Styles::default();
        if self.color.should_colorize() {
            styles.colorize();
        }
        styles
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    fn should_colorize(self) -> bool {
        match self {
            Color::Auto => std::io::stdout().is_terminal(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

/// Styles for rendering the tree and live status lines.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Styles {
    pub(crate) pass: Style,
    pub(crate) fail: Style,
    pub(crate) running: Style,
    pub(crate) target: Style,
    pub(crate) count: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.running = Style::new().yellow();
        self.target = Style::new().bold();
        self.count = Style::new().bold();
    }
}
