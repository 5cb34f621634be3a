// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! A CLI for collecting chunked browser test results and reconciling them
//! into one trustworthy dataset.
//!
//! The heavy lifting lives in the [`collector_runner`] crate; this crate
//! provides argument parsing, logging setup, and exit-code mapping.

mod dispatch;
mod errors;
mod output;

pub use dispatch::WptCollectorApp;
pub use errors::{CollectorExitCode, ExpectedError};
