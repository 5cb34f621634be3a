// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [wpt-collector](https://crates.io/crates/wpt-collector).
//!
//! This crate collects results from large, flaky, externally-invoked
//! browser test suites that are split into independently executed chunks,
//! and reconciles those chunk outputs into a single trustworthy dataset:
//!
//! - [`chunk_store`] persists one results set per chunk index with a
//!   monotonic improves-on-previous write guard.
//! - [`completeness`] diffs expected vs. actual test identifiers for one
//!   execution attempt.
//! - [`runner`] invokes the external test runner with bounded retries,
//!   committing only attempts whose output is complete.
//! - [`consolidate`] and [`upload`] stream the finalized chunk files into
//!   one merged report and transmit it to the results receiver.

pub mod chunk_store;
pub mod completeness;
pub mod config;
pub mod consolidate;
pub mod errors;
pub mod platform;
pub mod report;
pub mod runner;
pub mod upload;
