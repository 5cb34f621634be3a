// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driving the external test runner, one chunk at a time, with bounded
//! retries.
//!
//! The runner binary is an opaque collaborator: it is invoked as a
//! subprocess, its exit code is advisory only, and the sole completeness
//! signal is the expected-vs-actual comparison of its two output
//! artifacts. Chunks are driven sequentially because the browser under
//! test is a shared, stateful resource; within one attempt the only
//! concurrency is a pair of tasks forwarding the child's stdout and
//! stderr to the log sink as they are produced, so operators can observe
//! a multi-hour run live.

use crate::{
    chunk_store::{ChunkKey, ChunkLoadOutcome, ChunkStore},
    completeness::{Completeness, ExpectedTests},
    errors::{RunnerBuildError, RunnerError},
    platform::{self, BrowserSpec},
    report::TestReport,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, process::Stdio};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    runtime::Runtime,
    task::JoinHandle,
};
use tracing::{info, warn};

/// The default number of attempts per chunk.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// How to invoke the external test runner.
///
/// The engine appends its own artifact and chunk arguments
/// (`--log-raw`, `--log-wptreport`, `--this-chunk`, `--total-chunks`)
/// ahead of the pass-through arguments.
#[derive(Clone, Debug)]
pub struct RunnerCommand {
    /// The runner executable.
    pub program: Utf8PathBuf,
    /// Pass-through arguments handed to the runner verbatim.
    pub args: Vec<String>,
    /// Environment entries set explicitly for the child process.
    pub env: BTreeMap<String, String>,
}

impl RunnerCommand {
    /// Creates a command with no pass-through arguments.
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    fn attempt_args(&self, key: ChunkKey, report: &Utf8Path, raw_log: &Utf8Path) -> Vec<String> {
        let mut args = vec![
            "--log-raw".to_owned(),
            raw_log.to_string(),
            "--log-wptreport".to_owned(),
            report.to_string(),
            "--this-chunk".to_owned(),
            key.index().to_string(),
            "--total-chunks".to_owned(),
            key.total().to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }
}

/// Builder for [`ChunkRunner`].
#[derive(Debug)]
pub struct ChunkRunnerBuilder {
    command: RunnerCommand,
    artifacts_dir: Utf8PathBuf,
    max_attempts: usize,
    browser: Option<BrowserSpec>,
}

impl ChunkRunnerBuilder {
    /// Creates a builder. Per-attempt artifacts are written under
    /// `artifacts_dir`.
    pub fn new(command: RunnerCommand, artifacts_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            command,
            artifacts_dir: artifacts_dir.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            browser: None,
        }
    }

    /// Sets the attempt bound per chunk.
    pub fn set_max_attempts(&mut self, max_attempts: usize) -> &mut Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Enables the browser-version preflight check.
    pub fn set_browser_check(&mut self, browser: BrowserSpec) -> &mut Self {
        self.browser = Some(browser);
        self
    }

    /// Creates the runner, including its Tokio runtime.
    pub fn build(self) -> Result<ChunkRunner, RunnerBuildError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("collector-runner-worker")
            .build()
            .map_err(RunnerBuildError::TokioRuntimeCreate)?;
        Ok(ChunkRunner {
            runtime,
            command: self.command,
            artifacts_dir: self.artifacts_dir,
            max_attempts: self.max_attempts,
            browser: self.browser,
        })
    }
}

/// Drives the external runner for each chunk until its output is complete
/// or attempts are exhausted.
///
/// Created using [`ChunkRunnerBuilder::build`].
#[derive(Debug)]
pub struct ChunkRunner {
    runtime: Runtime,
    command: RunnerCommand,
    artifacts_dir: Utf8PathBuf,
    max_attempts: usize,
    browser: Option<BrowserSpec>,
}

impl ChunkRunner {
    /// Collects every chunk of the store, in ascending index order,
    /// running the platform preflight first if one is configured.
    ///
    /// A chunk that exhausts its attempts is a terminal failure for the
    /// whole run.
    pub fn collect_all(&self, store: &ChunkStore) -> Result<(), RunnerError> {
        self.preflight()?;
        for index in 1..=store.total_chunks() {
            self.collect_chunk(store, index)?;
        }
        Ok(())
    }

    /// Runs the configured platform preflight check, if any. Failures are
    /// surfaced immediately and consume no attempts.
    pub fn preflight(&self) -> Result<(), RunnerError> {
        if let Some(spec) = &self.browser {
            let probed = platform::verify_browser_version(spec)?;
            info!(expected = %spec.version, probed = %probed, "browser version verified");
        }
        Ok(())
    }

    /// Collects one chunk: invokes the runner up to `max_attempts` times,
    /// commits the first attempt whose output is exact and improves on the
    /// stored chunk, and returns the committed report.
    pub fn collect_chunk(
        &self,
        store: &ChunkStore,
        index: u32,
    ) -> Result<TestReport, RunnerError> {
        self.runtime.block_on(self.collect_chunk_impl(store, index))
    }

    async fn collect_chunk_impl(
        &self,
        store: &ChunkStore,
        index: u32,
    ) -> Result<TestReport, RunnerError> {
        let key = ChunkKey::new(index, store.total_chunks())
            .map_err(crate::errors::ChunkStoreError::from)?;
        let report_path = self.report_path(key);
        let raw_log_path = self.raw_log_path(key);
        let mut last_completeness: Option<Completeness> = None;

        for attempt in 1..=self.max_attempts {
            info!(chunk = %key, attempt, max_attempts = self.max_attempts, "starting attempt");

            // A crashed prior attempt must not leave behind a
            // misleadingly-valid-looking file.
            remove_stale_artifact(&report_path)?;
            remove_stale_artifact(&raw_log_path)?;

            let status = self.run_attempt(key, &report_path, &raw_log_path).await?;
            info!(chunk = %key, code = ?status.code(), "test runner exited");

            let report = match TestReport::normalize_file(&report_path) {
                Ok(report) => report,
                Err(error) => {
                    warn!(chunk = %key, %error, "discarding attempt: unreadable report");
                    continue;
                }
            };
            let expected = match ExpectedTests::from_raw_log(&raw_log_path) {
                Ok(expected) => expected,
                Err(error) => {
                    warn!(chunk = %key, %error, "discarding attempt: unreadable raw event log");
                    continue;
                }
            };

            let completeness = Completeness::analyze(&expected, &report);
            log_completeness(key, &completeness);
            let exact = completeness.is_exact();
            last_completeness = Some(completeness);
            if !exact {
                continue;
            }

            match store.load_chunk(index, &report_path)? {
                ChunkLoadOutcome::Committed(report) => {
                    info!(chunk = %key, results = report.results.len(), "chunk committed");
                    return Ok(report);
                }
                ChunkLoadOutcome::Insufficient { committed, offered } => {
                    warn!(
                        chunk = %key,
                        committed,
                        offered,
                        "complete attempt did not improve on the stored chunk",
                    );
                    continue;
                }
            }
        }

        // The partial artifact is discarded, never committed.
        if let Err(error) = std::fs::remove_file(&report_path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(chunk = %key, %error, "unable to discard partial report");
            }
        }
        let (missing, unexpected) = last_completeness
            .map(|completeness| (completeness.missing.len(), completeness.unexpected.len()))
            .unwrap_or((0, 0));
        Err(RunnerError::RetriesExhausted {
            key,
            attempts: self.max_attempts,
            missing,
            unexpected,
        })
    }

    async fn run_attempt(
        &self,
        key: ChunkKey,
        report_path: &Utf8Path,
        raw_log_path: &Utf8Path,
    ) -> Result<std::process::ExitStatus, RunnerError> {
        let args = self.command.attempt_args(key, report_path, raw_log_path);
        let command_display = format!("{} {}", self.command.program, args.join(" "));
        info!(command = %command_display, "invoking test runner");

        let mut command = Command::new(self.command.program.as_std_path());
        command
            .args(&args)
            .envs(&self.command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|error| RunnerError::Spawn {
            command: command_display,
            error,
        })?;
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let stdout_task: JoinHandle<()> = tokio::spawn(forward_lines(stdout, "stdout"));
        let stderr_task: JoinHandle<()> = tokio::spawn(forward_lines(stderr, "stderr"));

        let status = child.wait().await.map_err(RunnerError::Wait)?;

        // Both forwarders read to EOF before the attempt is considered
        // finished.
        stdout_task.await.map_err(RunnerError::OutputForward)?;
        stderr_task.await.map_err(RunnerError::OutputForward)?;

        Ok(status)
    }

    fn report_path(&self, key: ChunkKey) -> Utf8PathBuf {
        self.artifacts_dir.join(format!("{key}-report.json"))
    }

    fn raw_log_path(&self, key: ChunkKey) -> Utf8PathBuf {
        self.artifacts_dir.join(format!("{key}-raw.log"))
    }
}

async fn forward_lines(reader: impl AsyncRead + Unpin, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "wpt_run", "{stream}: {line}"),
            Ok(None) => break,
            Err(error) => {
                warn!(target: "wpt_run", %error, "error reading {stream} from test runner");
                break;
            }
        }
    }
}

fn remove_stale_artifact(path: &Utf8Path) -> Result<(), RunnerError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(RunnerError::StaleArtifactRemove {
            path: path.to_owned(),
            error,
        }),
    }
}

fn log_completeness(key: ChunkKey, completeness: &Completeness) {
    info!(chunk = %key, expected = completeness.total_expected, "expected results");
    info!(chunk = %key, actual = completeness.total_actual, "found results");
    info!(chunk = %key, count = completeness.unexpected.len(), "unexpected results");
    for test in &completeness.unexpected {
        info!(chunk = %key, "- {test}");
    }
    info!(chunk = %key, count = completeness.missing.len(), "missing results");
    for test in &completeness.missing {
        info!(chunk = %key, "- {test}");
    }
}
