// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expected error types and documented exit codes.

use collector_runner::{
    completeness::ThresholdVerdict,
    errors::{
        AnnotateError, ChunkStoreError, ConfigError, ConsolidateError, RawLogError,
        ReportReadError, ReportWriteError, RunnerBuildError, RunnerError, SummarizeError,
        UploadError,
    },
};
use camino::Utf8PathBuf;
use std::error::Error;
use thiserror::Error;

/// Documented exit codes for `wpt-collector` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum CollectorExitCode {}

impl CollectorExitCode {
    /// No errors occurred and the collector exited normally.
    pub const OK: i32 = 0;

    /// A user issue happened while setting up an invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more chunks could not be collected completely.
    pub const COLLECTION_FAILED: i32 = 100;

    /// A report failed threshold verification.
    pub const VERIFICATION_FAILED: i32 = 101;

    /// Consolidating chunk files produced an error.
    pub const CONSOLIDATION_FAILED: i32 = 102;

    /// Uploading the consolidated report produced an error.
    pub const UPLOAD_FAILED: i32 = 103;

    /// A chunk store operation failed or an invariant was violated.
    pub const STORE_ERROR: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}

/// An error occurred in a wpt-collector command that is expected to happen
/// in the course of operation.
#[derive(Debug, Error)]
pub enum ExpectedError {
    /// Loading or validating configuration failed.
    #[error("error loading configuration")]
    Config(#[from] ConfigError),

    /// A working directory could not be created.
    #[error("error creating directory `{path}`")]
    DirCreate {
        /// The directory that could not be created.
        path: Utf8PathBuf,
        /// The error that occurred.
        #[source]
        error: std::io::Error,
    },

    /// A chunk store operation failed.
    #[error("chunk store error")]
    Store(#[from] ChunkStoreError),

    /// Summarization failed.
    #[error("summarization failed")]
    Summarize(#[from] SummarizeError),

    /// The chunk runner could not be constructed.
    #[error("error building chunk runner")]
    RunnerBuild(#[from] RunnerBuildError),

    /// Collection failed.
    #[error("collection failed")]
    Collection(#[from] RunnerError),

    /// A report could not be read.
    #[error("error reading report")]
    Report(#[from] ReportReadError),

    /// A report or summary could not be written.
    #[error("error writing results")]
    ReportWrite(#[from] ReportWriteError),

    /// The raw event log could not be read.
    #[error("error reading raw event log")]
    RawLog(#[from] RawLogError),

    /// The report could not be annotated.
    #[error("error annotating report")]
    Annotate(#[from] AnnotateError),

    /// A report failed threshold verification.
    #[error("verification failed: {verdict}")]
    VerificationFailed {
        /// The rejecting verdict.
        verdict: ThresholdVerdict,
    },

    /// `--override-platform` was passed without the full platform
    /// identity.
    #[error(
        "--override-platform requires --product, --browser-version, --os and --os-version"
    )]
    MissingPlatformOverride,

    /// Consolidation failed.
    #[error("consolidation failed")]
    Consolidate(#[from] ConsolidateError),

    /// The upload failed.
    #[error("upload failed")]
    Upload(#[from] UploadError),

    /// Writing to stdout failed.
    #[error("error writing output")]
    WriteOutput(#[source] std::io::Error),
}

impl ExpectedError {
    /// The exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::DirCreate { .. }
            | Self::RunnerBuild(_)
            | Self::Report(_)
            | Self::ReportWrite(_)
            | Self::RawLog(_)
            | Self::Annotate(_)
            | Self::MissingPlatformOverride => CollectorExitCode::SETUP_ERROR,
            Self::Store(_) | Self::Summarize(_) => CollectorExitCode::STORE_ERROR,
            Self::Collection(error) => match error {
                RunnerError::BrowserVersionMismatch { .. }
                | RunnerError::BrowserVersionProbe { .. }
                | RunnerError::BrowserVersionParse { .. } => CollectorExitCode::SETUP_ERROR,
                _ => CollectorExitCode::COLLECTION_FAILED,
            },
            Self::VerificationFailed { .. } => CollectorExitCode::VERIFICATION_FAILED,
            Self::Consolidate(_) => CollectorExitCode::CONSOLIDATION_FAILED,
            Self::Upload(_) => CollectorExitCode::UPLOAD_FAILED,
            Self::WriteOutput(_) => CollectorExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error and its cause chain to stderr.
    pub fn display_to_stderr(&self) {
        let mut current: Option<&dyn Error> = Some(self);
        let mut first = true;
        while let Some(error) = current {
            if first {
                tracing::error!("{error}");
                first = false;
            } else {
                tracing::error!("  caused by: {error}");
            }
            current = error.source();
        }
    }
}
