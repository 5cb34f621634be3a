// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging setup for the CLI.

use clap::Args;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short = 'v', global = true)]
    pub(crate) verbose: bool,
}

impl OutputOpts {
    /// Initializes the tracing subscriber. The `WPT_COLLECTOR_LOG`
    /// environment variable, when set, overrides the default filter with a
    /// `tracing_subscriber::filter::Targets` spec.
    pub(crate) fn init(self) {
        let level_str = std::env::var_os("WPT_COLLECTOR_LOG").unwrap_or_default();
        let level_str = level_str
            .into_string()
            .unwrap_or_else(|_| panic!("WPT_COLLECTOR_LOG is not UTF-8"));

        let targets = if level_str.is_empty() {
            let default = if self.verbose {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };
            Targets::new().with_default(default)
        } else {
            level_str.parse().expect("unable to parse WPT_COLLECTOR_LOG")
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(targets);

        tracing_subscriber::registry().with(layer).init();
    }
}
