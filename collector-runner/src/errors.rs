// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the collection engine.
//!
//! The retry signal is deliberately not represented here: recoverable
//! conditions travel as plain values ([`ChunkLoadOutcome`],
//! [`ThresholdVerdict`]) and everything in this module is fatal for the
//! operation that raised it.
//!
//! [`ChunkLoadOutcome`]: crate::chunk_store::ChunkLoadOutcome
//! [`ThresholdVerdict`]: crate::completeness::ThresholdVerdict

use crate::chunk_store::ChunkKey;
use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// A chunk index outside `[1, total]` was supplied.
///
/// This is a programmer or configuration error, never a data error.
#[derive(Clone, Copy, Debug, Error)]
#[error("chunk index {index} out of range for {total} total chunks")]
pub struct InvalidChunkKey {
    /// The offending index.
    pub index: u32,
    /// The total number of chunks.
    pub total: u32,
}

/// An error that occurs while reading a results document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportReadError {
    /// The file could not be read.
    #[error("error reading report `{path}`")]
    Read {
        /// The path that could not be read.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// The file parsed as JSON but is not a results document.
    #[error("report `{path}` is not a valid results document")]
    Malformed {
        /// The path that failed to parse.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurs while writing a results document or summary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportWriteError {
    /// The document could not be serialized.
    #[error("error serializing results document")]
    Serialize(#[source] serde_json::Error),

    /// The file could not be written.
    #[error("error writing `{path}`")]
    Write {
        /// The path that could not be written.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },
}

/// A fatal error raised by the chunk store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChunkStoreError {
    /// The store directory could not be created.
    #[error("error creating chunk store directory `{dir}`")]
    StoreDirCreate {
        /// The directory that could not be created.
        dir: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// A chunk index outside the configured range was supplied.
    #[error(transparent)]
    InvalidKey(#[from] InvalidChunkKey),

    /// A chunk source file could not be read.
    #[error("error reading chunk source")]
    Source(#[from] ReportReadError),

    /// A committed chunk file could not be written.
    #[error("error writing chunk file `{path}`")]
    ChunkWrite {
        /// The path that could not be written.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// Chunk data could not be serialized.
    #[error("error serializing chunk data")]
    Serialize(#[source] serde_json::Error),

    /// A test identifier cannot be mapped into the output directory.
    #[error("refusing to write result file for test `{test}`: path escapes the output directory")]
    UnsafeTestPath {
        /// The offending test identifier.
        test: String,
    },

    /// The store directory could not be removed.
    #[error("error removing chunk store directory `{dir}`")]
    StoreDirRemove {
        /// The directory that could not be removed.
        dir: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },
}

/// An error that occurs while summarizing a chunk store.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum SummarizeError {
    /// After scanning every chunk, zero test results were found.
    #[error("no test results found in any chunk")]
    NoResults,

    /// The same test identifier appeared in more than one place across the
    /// committed chunks. Never silently resolved.
    #[error("duplicate results for test `{test}` (second occurrence in chunk {key})")]
    DuplicateTest {
        /// The repeated test identifier.
        test: String,
        /// The chunk in which the second occurrence was found.
        key: ChunkKey,
    },
}

/// An error that occurs while reading the runner's raw event log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RawLogError {
    /// The log file could not be read.
    #[error("error reading raw event log `{path}`")]
    Read {
        /// The path that could not be read.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// A `suite_start` event was found but its expected-test list does not
    /// have the declared shape.
    #[error("malformed suite_start event in raw event log `{path}`")]
    MalformedSuiteStart {
        /// The path containing the event.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurs while annotating a report with completeness
/// metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnnotateError {
    /// The report could not be read.
    #[error(transparent)]
    Read(#[from] ReportReadError),

    /// The annotated report could not be written back.
    #[error(transparent)]
    Write(#[from] ReportWriteError),
}

/// An error that occurs while constructing a chunk runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerBuildError {
    /// The Tokio runtime could not be created.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),
}

/// A fatal error raised while driving the external test runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// The browser under test does not match the configured version.
    ///
    /// Raised before any attempt starts; consumes no retries.
    #[error("browser version mismatch: expected {expected}, found {actual}")]
    BrowserVersionMismatch {
        /// The configured version.
        expected: String,
        /// The version the binary reported.
        actual: String,
    },

    /// The browser binary could not be asked for its version.
    #[error("error probing browser version via `{command}`")]
    BrowserVersionProbe {
        /// The probe command line.
        command: String,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// The browser's version output did not contain a version number.
    #[error("unable to parse a browser version from `{output}`")]
    BrowserVersionParse {
        /// The output that could not be parsed.
        output: String,
    },

    /// A stale artifact from a prior attempt could not be deleted.
    #[error("error removing stale artifact `{path}`")]
    StaleArtifactRemove {
        /// The artifact path.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// The external test runner could not be launched.
    #[error("error launching test runner: `{command}`")]
    Spawn {
        /// The command line that failed to launch.
        command: String,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// Waiting for the test runner to exit failed.
    #[error("error waiting for test runner to exit")]
    Wait(#[source] io::Error),

    /// An output-forwarding task panicked or was cancelled.
    #[error("error joining output forwarding task")]
    OutputForward(#[source] tokio::task::JoinError),

    /// Every attempt produced incomplete results.
    #[error(
        "failed to collect complete results for chunk {key} after {attempts} attempts \
         ({missing} missing, {unexpected} unexpected)"
    )]
    RetriesExhausted {
        /// The chunk that could not be collected.
        key: ChunkKey,
        /// The number of attempts made.
        attempts: usize,
        /// Missing test identifiers in the final attempt.
        missing: usize,
        /// Unexpected test identifiers in the final attempt.
        unexpected: usize,
    },

    /// A chunk store operation failed.
    #[error(transparent)]
    Store(#[from] ChunkStoreError),
}

/// An error that occurs while consolidating chunk files into one report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsolidateError {
    /// No chunk files were supplied.
    #[error("no chunk files supplied")]
    Empty,

    /// The number of chunk files does not match the configured total.
    #[error("expected {expected} chunk files, found {actual}")]
    ChunkCountMismatch {
        /// The configured total number of chunks.
        expected: usize,
        /// The number of chunk files supplied.
        actual: usize,
    },

    /// A chunk file could not be read.
    #[error("error reading chunk file `{path}`")]
    Read {
        /// The path that could not be read.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// A chunk file is not a valid results document.
    #[error("malformed chunk file `{path}`")]
    Malformed {
        /// The path that failed to parse.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: serde_json::Error,
    },

    /// A chunk file carries no `run_info` metadata.
    #[error("chunk file `{path}` is missing run_info metadata")]
    MissingRunInfo {
        /// The offending path.
        path: Utf8PathBuf,
    },

    /// A chunk file's `run_info` differs from the other chunks'.
    #[error("run_info in `{path}` does not match the other chunks' metadata")]
    RunInfoMismatch {
        /// The offending path.
        path: Utf8PathBuf,
    },

    /// A chunk file lacks the timestamps the caller declared present.
    #[error("chunk file `{path}` is missing time_start/time_end timestamps")]
    MissingTimestamps {
        /// The offending path.
        path: Utf8PathBuf,
    },

    /// A chunk file carries timestamps the caller declared absent.
    #[error("chunk file `{path}` has timestamps but none were expected")]
    UnexpectedTimestamps {
        /// The offending path.
        path: Utf8PathBuf,
    },

    /// The output file could not be created.
    #[error("error creating consolidated report `{path}`")]
    Create {
        /// The path that could not be created.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// Writing the consolidated document failed.
    #[error("error writing consolidated report")]
    Write(#[source] io::Error),

    /// Serializing a component of the consolidated document failed.
    #[error("error serializing consolidated report")]
    Serialize(#[source] serde_json::Error),
}

/// An error that occurs while uploading a consolidated report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// The consolidated report could not be read.
    #[error("error reading consolidated report `{path}`")]
    FileRead {
        /// The path that could not be read.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// The request could not be transmitted.
    #[error("error sending upload request to `{url}`")]
    Transport {
        /// The receiving endpoint.
        url: String,
        /// The error that occurred.
        #[source]
        error: Box<ureq::Error>,
    },

    /// The response body could not be read.
    #[error("error reading upload response body")]
    ResponseRead(#[source] Box<ureq::Error>),

    /// The endpoint rejected the upload.
    #[error("upload rejected with HTTP status {status}: {body}")]
    Status {
        /// The response status code.
        status: u16,
        /// The response body text.
        body: String,
    },
}

/// An error that occurs while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("error reading config file `{path}`")]
    Read {
        /// The path that could not be read.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: io::Error,
    },

    /// The config file could not be parsed.
    #[error("error parsing config file `{path}`")]
    Parse {
        /// The path that failed to parse.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: Box<toml::de::Error>,
    },

    /// `total_chunks` must be at least 1.
    #[error("total_chunks must be at least 1")]
    InvalidTotalChunks,

    /// `max_attempts` must be at least 1.
    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,

    /// The completeness threshold is outside `(0, 1]`.
    #[error("completeness threshold {value} must be within (0, 1]")]
    InvalidThreshold {
        /// The rejected value.
        value: f64,
    },

    /// Platform overrides were requested without a `[browser]` section.
    #[error("upload.override_platform requires a [browser] section")]
    MissingBrowserSection,
}
