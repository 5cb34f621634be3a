// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The canonical shape of results exchanged with the external test runner.
//!
//! A [`TestReport`] is the document the runner writes for one execution
//! attempt: a `results` array of [`TestResult`] entries plus opaque
//! `run_info` metadata and optional wall-clock timestamps. Reports are
//! validated at the parse boundary; the only tolerated malformed inputs are
//! the two cases where the runner is known to exit without writing a
//! well-formed file (see [`TestReport::from_file_lenient`]).

use crate::{
    completeness::CompletenessSummary,
    errors::{ReportReadError, ReportWriteError},
};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io::Write};

/// Compression level used for all artifacts this crate writes.
pub(crate) const ZSTD_LEVEL: i32 = 3;

/// Status of a whole test file, as reported by the external runner.
///
/// `OK` means the test file ran to completion; the pass/fail signal for
/// individual assertions lives in the subtests. Single-page tests report
/// `PASS`/`FAIL` directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// The test file ran to completion.
    Ok,
    /// The test passed.
    Pass,
    /// The test failed.
    Fail,
    /// The test timed out.
    Timeout,
    /// The harness reported an error.
    Error,
    /// The browser crashed.
    Crash,
    /// The test was scheduled but never ran.
    Notrun,
    /// A precondition for the test was not met.
    PreconditionFailed,
    /// The test was skipped.
    Skip,
}

impl TestStatus {
    /// Returns true if this status counts toward the passing total.
    pub fn is_passing(self) -> bool {
        matches!(self, TestStatus::Ok | TestStatus::Pass)
    }
}

/// Status of a single subtest.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtestStatus {
    /// The subtest passed.
    Pass,
    /// The subtest failed.
    Fail,
    /// The subtest timed out.
    Timeout,
    /// The subtest never ran.
    Notrun,
    /// The subtest reported an error.
    Error,
    /// A precondition for the subtest was not met.
    PreconditionFailed,
    /// The subtest was skipped.
    Skip,
    /// An assertion-count check failed.
    Assert,
}

impl SubtestStatus {
    /// Returns true if this status counts toward the passing total.
    pub fn is_passing(self) -> bool {
        matches!(self, SubtestStatus::Pass)
    }
}

/// The outcome of one subtest. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubtestOutcome {
    /// The subtest name, unique within its parent test.
    pub name: String,
    /// The reported status.
    pub status: SubtestStatus,
    /// An optional human-readable message (typically the failure reason).
    #[serde(default)]
    pub message: Option<String>,
}

/// The outcome of one test file (or multi-global test variant).
///
/// `test` is a slash-rooted identifier; it is not guaranteed to map
/// one-to-one onto a filesystem path, since one file may emit several test
/// identifiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// The slash-rooted test identifier, unique within one results set.
    pub test: String,
    /// The reported status of the whole test.
    pub status: TestStatus,
    /// An optional human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Subtest outcomes, in the order the runner emitted them.
    pub subtests: Vec<SubtestOutcome>,
}

/// Opaque runner metadata attached to a report. Compared for equality
/// during consolidation, never interpreted.
pub type RunInfo = serde_json::Map<String, serde_json::Value>;

/// The structured results document for one execution attempt or one
/// committed chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// All test results in this report.
    pub results: Vec<TestResult>,
    /// Opaque runner metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_info: Option<RunInfo>,
    /// Epoch seconds at which the attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<f64>,
    /// Epoch seconds at which the attempt ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<f64>,
    /// Completeness metadata attached by verification, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness: Option<CompletenessSummary>,
}

impl TestReport {
    /// Reads a report, rejecting any document that is missing or malformed.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ReportReadError> {
        let contents = fs::read_to_string(path).map_err(|error| ReportReadError::Read {
            path: path.to_owned(),
            error,
        })?;
        serde_json::from_str(&contents).map_err(|error| ReportReadError::Malformed {
            path: path.to_owned(),
            error,
        })
    }

    /// Reads a report, tolerating the runner's known failure mode of
    /// exiting before a well-formed file is written.
    ///
    /// An absent file or one that is not syntactically valid JSON is
    /// interpreted as an empty results set. A document that parses as JSON
    /// but does not have the report shape is still rejected.
    pub fn from_file_lenient(path: &Utf8Path) -> Result<Self, ReportReadError> {
        Self::read_lenient(path).map(|(report, _)| report)
    }

    /// Reads a report leniently, and rewrites the file as `{"results": []}`
    /// if it was absent or unparseable, so that later readers see a valid
    /// document.
    pub fn normalize_file(path: &Utf8Path) -> Result<Self, ReportReadError> {
        let (report, fell_back) = Self::read_lenient(path)?;
        if fell_back {
            if let Err(error) = report.write_to_file(path) {
                tracing::warn!(%path, %error, "unable to rewrite normalized report");
            }
        }
        Ok(report)
    }

    /// Returns the parsed report plus whether the empty-report fallback was
    /// taken.
    fn read_lenient(path: &Utf8Path) -> Result<(Self, bool), ReportReadError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::default(), true));
            }
            Err(error) => {
                return Err(ReportReadError::Read {
                    path: path.to_owned(),
                    error,
                });
            }
        };
        match serde_json::from_str(&contents) {
            Ok(report) => Ok((report, false)),
            Err(error) => match error.classify() {
                serde_json::error::Category::Syntax | serde_json::error::Category::Eof => {
                    Ok((Self::default(), true))
                }
                _ => Err(ReportReadError::Malformed {
                    path: path.to_owned(),
                    error,
                }),
            },
        }
    }

    /// Serializes this report to `path` as JSON.
    pub fn write_to_file(&self, path: &Utf8Path) -> Result<(), ReportWriteError> {
        let json = serde_json::to_string(self).map_err(ReportWriteError::Serialize)?;
        fs::write(path, json).map_err(|error| ReportWriteError::Write {
            path: path.to_owned(),
            error,
        })
    }
}

/// The `[passingCount, totalCount]` pair for one test, where the test
/// itself contributes one count and each subtest contributes another.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct SummaryCounts {
    /// The number of passing outcomes.
    pub passing: u32,
    /// The total number of outcomes.
    pub total: u32,
}

impl SummaryCounts {
    /// Computes the counts for one test result.
    pub fn of(result: &TestResult) -> Self {
        let passing = u32::from(result.status.is_passing())
            + result
                .subtests
                .iter()
                .filter(|subtest| subtest.status.is_passing())
                .count() as u32;
        let total = 1 + result.subtests.len() as u32;
        Self { passing, total }
    }
}

impl From<[u32; 2]> for SummaryCounts {
    fn from([passing, total]: [u32; 2]) -> Self {
        Self { passing, total }
    }
}

impl From<SummaryCounts> for [u32; 2] {
    fn from(counts: SummaryCounts) -> Self {
        [counts.passing, counts.total]
    }
}

/// A mapping from test identifier to [`SummaryCounts`]: the minimal data
/// needed to render pass-rate dashboards.
///
/// Serialized as a JSON object of `testPath: [passing, total]` pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Summary {
    counts: BTreeMap<String, SummaryCounts>,
}

impl Summary {
    /// Creates an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of tests in this summary.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if the summary contains no tests.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Returns the counts recorded for `test`, if any.
    pub fn get(&self, test: &str) -> Option<SummaryCounts> {
        self.counts.get(test).copied()
    }

    /// Records counts for `test`, returning the previously recorded counts
    /// if the test was already present.
    pub fn insert(&mut self, test: String, counts: SummaryCounts) -> Option<SummaryCounts> {
        self.counts.insert(test, counts)
    }

    /// Iterates over `(test, counts)` pairs in test-identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SummaryCounts)> {
        self.counts
            .iter()
            .map(|(test, counts)| (test.as_str(), *counts))
    }

    /// Writes this summary to `path` as zstd-compressed JSON.
    pub fn write_compressed(&self, path: &Utf8Path) -> Result<(), ReportWriteError> {
        let json = serde_json::to_vec(self).map_err(ReportWriteError::Serialize)?;
        let file = fs::File::create(path).map_err(|error| ReportWriteError::Write {
            path: path.to_owned(),
            error,
        })?;
        let write_err = |error| ReportWriteError::Write {
            path: path.to_owned(),
            error,
        };
        let mut encoder = zstd::stream::Encoder::new(file, ZSTD_LEVEL).map_err(write_err)?;
        encoder.write_all(&json).map_err(write_err)?;
        encoder.finish().map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn result(test: &str, status: TestStatus, subtests: Vec<SubtestOutcome>) -> TestResult {
        TestResult {
            test: test.to_owned(),
            status,
            message: None,
            subtests,
        }
    }

    fn subtest(name: &str, status: SubtestStatus) -> SubtestOutcome {
        SubtestOutcome {
            name: name.to_owned(),
            status,
            message: None,
        }
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TestStatus::PreconditionFailed).unwrap(),
            "\"PRECONDITION_FAILED\"",
        );
        assert_eq!(
            serde_json::from_str::<TestStatus>("\"OK\"").unwrap(),
            TestStatus::Ok,
        );
        assert_eq!(
            serde_json::from_str::<SubtestStatus>("\"NOTRUN\"").unwrap(),
            SubtestStatus::Notrun,
        );
        serde_json::from_str::<TestStatus>("\"BOGUS\"").unwrap_err();
    }

    #[test]
    fn summary_counts_formula() {
        let result = result(
            "/js/with-statement.html",
            TestStatus::Ok,
            vec![
                subtest("first", SubtestStatus::Pass),
                subtest("second", SubtestStatus::Fail),
            ],
        );
        assert_eq!(
            SummaryCounts::of(&result),
            SummaryCounts {
                passing: 2,
                total: 3
            },
        );
    }

    #[test]
    fn summary_counts_failing_test() {
        let result = result("/js/symbol-unscopables.html", TestStatus::Timeout, vec![]);
        assert_eq!(
            SummaryCounts::of(&result),
            SummaryCounts {
                passing: 0,
                total: 1
            },
        );
    }

    #[test]
    fn summary_serializes_as_pairs() {
        let mut summary = Summary::new();
        summary.insert(
            "/js/isNaN.html".to_owned(),
            SummaryCounts {
                passing: 3,
                total: 4,
            },
        );
        assert_eq!(
            serde_json::to_string(&summary).unwrap(),
            r#"{"/js/isNaN.html":[3,4]}"#,
        );
        let parsed: Summary = serde_json::from_str(r#"{"/js/isNaN.html":[3,4]}"#).unwrap();
        assert_eq!(parsed, summary);
    }

    #[test]
    fn lenient_read_missing_file() {
        let dir = Utf8TempDir::new().unwrap();
        let report = TestReport::from_file_lenient(&dir.path().join("absent.json")).unwrap();
        assert_eq!(report, TestReport::default());
    }

    #[test]
    fn lenient_read_invalid_json() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "{\"results\": [").unwrap();
        let report = TestReport::from_file_lenient(&path).unwrap();
        assert_eq!(report, TestReport::default());
    }

    #[test]
    fn lenient_read_rejects_wrong_shape() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "{\"results\": \"nope\"}").unwrap();
        TestReport::from_file_lenient(&path).unwrap_err();
    }

    #[test]
    fn normalize_rewrites_invalid_file() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "not json at all").unwrap();
        let report = TestReport::normalize_file(&path).unwrap();
        assert_eq!(report, TestReport::default());

        let rewritten = std::fs::read_to_string(&path).unwrap();
        let parsed: TestReport = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(parsed, TestReport::default());
    }

    #[test]
    fn report_round_trip() {
        let report = TestReport {
            results: vec![result(
                "/js/isNaN.html",
                TestStatus::Ok,
                vec![subtest("first", SubtestStatus::Pass)],
            )],
            run_info: Some(
                serde_json::from_str(r#"{"product": "firefox", "os": "linux"}"#).unwrap(),
            ),
            time_start: Some(10.0),
            time_end: Some(300.0),
            completeness: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        let parsed: TestReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn summary_compressed_round_trip() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("summary.json.zst");
        let mut summary = Summary::new();
        summary.insert(
            "/js/void-statement.html".to_owned(),
            SummaryCounts {
                passing: 2,
                total: 5,
            },
        );
        summary.write_compressed(&path).unwrap();

        let compressed = std::fs::read(&path).unwrap();
        let decompressed = zstd::decode_all(&compressed[..]).unwrap();
        let parsed: Summary = serde_json::from_slice(&decompressed).unwrap();
        assert_eq!(parsed, summary);
    }
}
