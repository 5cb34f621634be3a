// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform identity checks performed before any collection attempt.
//!
//! A run is labelled with the browser version it claims to exercise; if
//! the installed binary reports something else, every collected result
//! would be attributed to the wrong platform. The check runs once, before
//! the first attempt, and consumes no retries.

use crate::errors::RunnerError;
use camino::Utf8PathBuf;
use std::process::Command;

/// The browser identity a run is expected to exercise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BrowserSpec {
    /// The browser binary to probe.
    pub binary: Utf8PathBuf,
    /// The version the run is labelled with (full or `major.minor`
    /// prefix).
    pub version: String,
}

/// Asks the browser binary for its version and compares it against the
/// configured one. Returns the probed version on success.
pub fn verify_browser_version(spec: &BrowserSpec) -> Result<String, RunnerError> {
    let command = format!("{} --version", spec.binary);
    let output = Command::new(spec.binary.as_std_path())
        .arg("--version")
        .output()
        .map_err(|error| RunnerError::BrowserVersionProbe {
            command: command.clone(),
            error,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let probed =
        extract_version(&stdout).ok_or_else(|| RunnerError::BrowserVersionParse {
            output: stdout.trim().to_owned(),
        })?;

    if versions_match(&spec.version, &probed) {
        Ok(probed)
    } else {
        Err(RunnerError::BrowserVersionMismatch {
            expected: spec.version.clone(),
            actual: probed,
        })
    }
}

/// Extracts the first dotted version number from `--version` output, e.g.
/// `115.0.2` from `Mozilla Firefox 115.0.2`.
fn extract_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_ascii_digit())
                .to_owned()
        })
        .find(|token| {
            !token.is_empty()
                && token.contains('.')
                && token.chars().all(|c| c.is_ascii_digit() || c == '.')
        })
}

/// Two versions match when their dotted components agree over the shorter
/// of the two, so a configured `115.0` accepts a probed `115.0.2`.
fn versions_match(expected: &str, probed: &str) -> bool {
    expected
        .split('.')
        .zip(probed.split('.'))
        .all(|(a, b)| a == b)
}
