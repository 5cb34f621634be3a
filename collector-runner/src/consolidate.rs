// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging finalized chunk files into one publishable report.
//!
//! The consolidator streams the merged document: each chunk is read,
//! validated, emitted, and released before the next is touched, so the
//! full results set is never materialized in memory. Every inconsistency
//! (wrong chunk-file count, divergent `run_info`, non-uniform timestamp
//! presence) aborts the whole operation; nothing is ever patched over.

use crate::{
    errors::ConsolidateError,
    report::{RunInfo, TestReport, ZSTD_LEVEL},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fs, io::Write};

/// Browser/OS identity fields patched into the merged `run_info`.
///
/// Needed when the external runner does not embed platform metadata in its
/// reports (a known gap for remote-browser runs).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformOverrides {
    /// The browser product name.
    pub product: String,
    /// The browser version.
    pub browser_version: String,
    /// The operating system name.
    pub os: String,
    /// The operating system version.
    pub os_version: String,
}

const OVERRIDE_KEYS: [&str; 4] = ["product", "browser_version", "os", "os_version"];

impl PlatformOverrides {
    fn apply(&self, run_info: &mut RunInfo) {
        for (key, value) in [
            ("product", &self.product),
            ("browser_version", &self.browser_version),
            ("os", &self.os),
            ("os_version", &self.os_version),
        ] {
            run_info.insert(key.to_owned(), serde_json::Value::String(value.clone()));
        }
    }
}

/// Whether chunk files are expected to carry `time_start`/`time_end`.
///
/// Mixed presence across chunks is fatal under either policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TimestampPolicy {
    /// Every chunk must carry both timestamps; the merged document gets
    /// the min start and max end.
    #[default]
    Required,
    /// No chunk may carry timestamps; the merged document omits them.
    Absent,
}

/// Streams N finalized chunk files into one merged report document.
#[derive(Debug)]
pub struct Consolidator {
    chunk_files: Vec<Utf8PathBuf>,
    total_chunks: u32,
    overrides: Option<PlatformOverrides>,
    timestamps: TimestampPolicy,
}

impl Consolidator {
    /// Creates a consolidator over `chunk_files`, which must number
    /// exactly `total_chunks` when the document is written.
    pub fn new(chunk_files: Vec<Utf8PathBuf>, total_chunks: u32) -> Self {
        Self {
            chunk_files,
            total_chunks,
            overrides: None,
            timestamps: TimestampPolicy::default(),
        }
    }

    /// Patches the given platform identity into the merged `run_info`.
    pub fn with_overrides(mut self, overrides: PlatformOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Declares whether chunk files carry timestamps.
    pub fn with_timestamp_policy(mut self, timestamps: TimestampPolicy) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Writes the merged document to `writer`.
    ///
    /// The chunk-file count precondition is checked before any byte is
    /// produced; all other violations abort mid-stream, so callers must
    /// treat the output as garbage unless this returns `Ok`.
    pub fn write_to(&self, mut writer: impl Write) -> Result<(), ConsolidateError> {
        if self.chunk_files.is_empty() {
            return Err(ConsolidateError::Empty);
        }
        if self.chunk_files.len() != self.total_chunks as usize {
            return Err(ConsolidateError::ChunkCountMismatch {
                expected: self.total_chunks as usize,
                actual: self.chunk_files.len(),
            });
        }

        let mut run_info: Option<RunInfo> = None;
        let mut time_range: Option<(f64, f64)> = None;
        let mut emitted_result = false;

        writer
            .write_all(b"{\"results\":[")
            .map_err(ConsolidateError::Write)?;

        for path in &self.chunk_files {
            let chunk = read_chunk(path)?;

            let chunk_run_info = chunk.run_info.ok_or_else(|| {
                ConsolidateError::MissingRunInfo {
                    path: path.clone(),
                }
            })?;
            match &run_info {
                None => run_info = Some(chunk_run_info),
                Some(seen) => {
                    if self.comparable(seen) != self.comparable(&chunk_run_info) {
                        return Err(ConsolidateError::RunInfoMismatch { path: path.clone() });
                    }
                }
            }

            match self.timestamps {
                TimestampPolicy::Required => {
                    let (Some(start), Some(end)) = (chunk.time_start, chunk.time_end) else {
                        return Err(ConsolidateError::MissingTimestamps { path: path.clone() });
                    };
                    time_range = Some(match time_range {
                        None => (start, end),
                        Some((seen_start, seen_end)) => {
                            (seen_start.min(start), seen_end.max(end))
                        }
                    });
                }
                TimestampPolicy::Absent => {
                    if chunk.time_start.is_some() || chunk.time_end.is_some() {
                        return Err(ConsolidateError::UnexpectedTimestamps {
                            path: path.clone(),
                        });
                    }
                }
            }

            for result in &chunk.results {
                if emitted_result {
                    writer.write_all(b",").map_err(ConsolidateError::Write)?;
                }
                emitted_result = true;
                serde_json::to_writer(&mut writer, result).map_err(ConsolidateError::Serialize)?;
            }
        }

        writer.write_all(b"]").map_err(ConsolidateError::Write)?;

        let mut run_info = run_info.expect("at least one chunk was read");
        if let Some(overrides) = &self.overrides {
            overrides.apply(&mut run_info);
        }
        writer
            .write_all(b",\"run_info\":")
            .map_err(ConsolidateError::Write)?;
        serde_json::to_writer(&mut writer, &run_info).map_err(ConsolidateError::Serialize)?;

        if let TimestampPolicy::Required = self.timestamps {
            let (start, end) = time_range.expect("at least one chunk was read");
            writer
                .write_all(b",\"time_start\":")
                .map_err(ConsolidateError::Write)?;
            serde_json::to_writer(&mut writer, &start).map_err(ConsolidateError::Serialize)?;
            writer
                .write_all(b",\"time_end\":")
                .map_err(ConsolidateError::Write)?;
            serde_json::to_writer(&mut writer, &end).map_err(ConsolidateError::Serialize)?;
        }

        writer.write_all(b"}").map_err(ConsolidateError::Write)?;
        Ok(())
    }

    /// Writes the merged document to `path` as a zstd-compressed file.
    pub fn write_compressed(&self, path: &Utf8Path) -> Result<(), ConsolidateError> {
        let file = fs::File::create(path).map_err(|error| ConsolidateError::Create {
            path: path.to_owned(),
            error,
        })?;
        let mut encoder =
            zstd::stream::Encoder::new(file, ZSTD_LEVEL).map_err(ConsolidateError::Write)?;
        self.write_to(&mut encoder)?;
        encoder.finish().map_err(ConsolidateError::Write)?;
        Ok(())
    }

    /// The `run_info` view used for the equality check: override fields
    /// are excluded from comparison when overrides are supplied, since
    /// they will be patched anyway.
    fn comparable(&self, run_info: &RunInfo) -> RunInfo {
        let mut comparable = run_info.clone();
        if self.overrides.is_some() {
            for key in OVERRIDE_KEYS {
                comparable.remove(key);
            }
        }
        comparable
    }
}

fn read_chunk(path: &Utf8Path) -> Result<TestReport, ConsolidateError> {
    let contents = fs::read_to_string(path).map_err(|error| ConsolidateError::Read {
        path: path.to_owned(),
        error,
    })?;
    serde_json::from_str(&contents).map_err(|error| ConsolidateError::Malformed {
        path: path.to_owned(),
        error,
    })
}
