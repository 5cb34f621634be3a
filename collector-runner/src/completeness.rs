// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deciding whether one execution attempt's output is acceptable.
//!
//! Two independently-sourced sets of test identifiers are compared: the
//! set the runner *claims* it intended to run (declared in a
//! `suite_start` event in its raw event log) and the set it *actually
//! reported results for*. The runner's exit code is not a trustworthy
//! completeness signal; a runner can exit 0 while silently dropping
//! results for hung tests.
//!
//! Two acceptance policies are supported. The retry driver uses
//! [`Completeness::is_exact`]; publishing a final, possibly-imperfect
//! dataset uses [`Completeness::check_threshold`], which tolerates the
//! small amount of nondeterministic flakiness inherent to browser
//! automation while still catching gross failures.

use crate::{
    errors::{AnnotateError, RawLogError},
    report::TestReport,
};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt, fs,
    io::{BufRead, BufReader},
};

/// The default acceptable ratio of incorrect (missing plus unexpected)
/// results to expected results.
pub const DEFAULT_THRESHOLD: f64 = 0.02;

/// The set of tests the runner declared it would execute.
///
/// A raw log with a `suite_start` event carrying an empty list is a
/// legitimately empty chunk; a raw log with no `suite_start` event at all
/// carries no expected-set information. The two cases are deliberately
/// kept distinct.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExpectedTests {
    /// A `suite_start` event declared this (possibly empty) set.
    Declared(BTreeSet<String>),
    /// No `suite_start` event was found.
    Undeclared,
}

#[derive(Debug, Deserialize)]
struct SuiteStartEvent {
    tests: SuiteStartTests,
}

#[derive(Debug, Deserialize)]
struct SuiteStartTests {
    default: Vec<String>,
}

impl ExpectedTests {
    /// Scans a newline-delimited JSON event log for the first
    /// `suite_start` event and returns the declared test set.
    ///
    /// Lines that are not valid JSON are skipped; a `suite_start` event
    /// whose test list does not have the declared shape is an error.
    pub fn from_raw_log(path: &Utf8Path) -> Result<Self, RawLogError> {
        let file = fs::File::open(path).map_err(|error| RawLogError::Read {
            path: path.to_owned(),
            error,
        })?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line.map_err(|error| RawLogError::Read {
                path: path.to_owned(),
                error,
            })?;
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                continue;
            };
            if value.get("action").and_then(serde_json::Value::as_str) != Some("suite_start") {
                continue;
            }
            let event: SuiteStartEvent = serde_json::from_value(value).map_err(|error| {
                RawLogError::MalformedSuiteStart {
                    path: path.to_owned(),
                    error,
                }
            })?;
            return Ok(ExpectedTests::Declared(
                event.tests.default.into_iter().collect(),
            ));
        }

        Ok(ExpectedTests::Undeclared)
    }

    /// Returns true if a `suite_start` event was found.
    pub fn is_declared(&self) -> bool {
        matches!(self, ExpectedTests::Declared(_))
    }

    /// The number of declared tests (zero when undeclared).
    pub fn len(&self) -> usize {
        match self {
            ExpectedTests::Declared(tests) => tests.len(),
            ExpectedTests::Undeclared => 0,
        }
    }

    /// Returns true if no tests were declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The expected-vs-actual comparison for one execution attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Completeness {
    /// The number of tests the runner declared it would execute.
    pub total_expected: usize,
    /// The number of tests the runner reported results for.
    pub total_actual: usize,
    /// Reported tests that were never declared.
    pub unexpected: BTreeSet<String>,
    /// Declared tests that were never reported.
    pub missing: BTreeSet<String>,
    /// Whether a `suite_start` event was found at all.
    pub expected_declared: bool,
}

impl Completeness {
    /// Compares the declared test set against the tests a report actually
    /// contains.
    pub fn analyze(expected: &ExpectedTests, report: &TestReport) -> Self {
        let empty = BTreeSet::new();
        let expected_set = match expected {
            ExpectedTests::Declared(tests) => tests,
            ExpectedTests::Undeclared => &empty,
        };
        let actual: BTreeSet<String> = report
            .results
            .iter()
            .map(|result| result.test.clone())
            .collect();

        let unexpected = actual.difference(expected_set).cloned().collect();
        let missing = expected_set.difference(&actual).cloned().collect();

        Self {
            total_expected: expected_set.len(),
            total_actual: actual.len(),
            unexpected,
            missing,
            expected_declared: expected.is_declared(),
        }
    }

    /// The number of incorrect results: missing plus unexpected.
    pub fn incorrect(&self) -> usize {
        self.unexpected.len() + self.missing.len()
    }

    /// Exact-match policy: acceptable iff nothing is missing and nothing
    /// is unexpected. Used by the retry driver.
    pub fn is_exact(&self) -> bool {
        self.unexpected.is_empty() && self.missing.is_empty()
    }

    /// The ratio of incorrect results to expected results (0.0 when
    /// nothing was expected).
    pub fn ratio(&self) -> f64 {
        if self.total_expected == 0 {
            0.0
        } else {
            self.incorrect() as f64 / self.total_expected as f64
        }
    }

    /// Threshold policy: tolerate a bounded ratio of incorrect results.
    ///
    /// An empty expected set is vacuously accepted only when nothing was
    /// reported either; an empty expected set paired with reported results
    /// indicates a malformed expected-log and is never acceptable.
    pub fn check_threshold(&self, threshold: f64) -> ThresholdVerdict {
        if self.total_expected == 0 {
            if self.incorrect() == 0 {
                ThresholdVerdict::Accepted
            } else {
                ThresholdVerdict::RejectedEmptyExpected {
                    total_actual: self.total_actual,
                }
            }
        } else {
            let ratio = self.ratio();
            if ratio < threshold {
                ThresholdVerdict::Accepted
            } else {
                ThresholdVerdict::RejectedRatio { ratio, threshold }
            }
        }
    }

    /// The serializable form attached to verified reports for downstream
    /// auditing.
    pub fn summary(&self) -> CompletenessSummary {
        CompletenessSummary {
            total_expected: self.total_expected,
            total_unexpected: self.unexpected.len(),
            total_missing: self.missing.len(),
        }
    }
}

/// The outcome of the threshold policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThresholdVerdict {
    /// The attempt is acceptable for publishing.
    Accepted,
    /// The incorrect-result ratio met or exceeded the threshold.
    RejectedRatio {
        /// The observed ratio.
        ratio: f64,
        /// The configured threshold.
        threshold: f64,
    },
    /// Nothing was expected, yet results were reported; the expected-log
    /// is malformed.
    RejectedEmptyExpected {
        /// The number of reported results.
        total_actual: usize,
    },
}

impl ThresholdVerdict {
    /// Returns true if the attempt was accepted.
    pub fn is_accepted(self) -> bool {
        matches!(self, ThresholdVerdict::Accepted)
    }
}

impl fmt::Display for ThresholdVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdVerdict::Accepted => write!(f, "accepted"),
            ThresholdVerdict::RejectedRatio { ratio, threshold } => write!(
                f,
                "rejected: incorrect-result ratio {ratio:.4} is not below threshold {threshold}",
            ),
            ThresholdVerdict::RejectedEmptyExpected { total_actual } => write!(
                f,
                "rejected: {total_actual} results reported but zero tests were expected",
            ),
        }
    }
}

/// Integer completeness counts, attached to a report as the
/// `completeness` property.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CompletenessSummary {
    /// The number of tests the runner declared it would execute.
    pub total_expected: usize,
    /// The number of reported tests that were never declared.
    pub total_unexpected: usize,
    /// The number of declared tests that were never reported.
    pub total_missing: usize,
}

/// Extends the report at `path` with completeness metadata, rewriting the
/// file in place.
pub fn annotate_report(path: &Utf8Path, summary: CompletenessSummary) -> Result<(), AnnotateError> {
    let mut report = TestReport::from_file(path)?;
    report.completeness = Some(summary);
    report.write_to_file(path)?;
    Ok(())
}
