// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing and command dispatch.

use crate::{
    errors::{CollectorExitCode, ExpectedError},
    output::OutputOpts,
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use collector_runner::{
    chunk_store::ChunkStore,
    completeness::{Completeness, DEFAULT_THRESHOLD, ExpectedTests, annotate_report},
    config::CollectorConfig,
    consolidate::{Consolidator, PlatformOverrides, TimestampPolicy},
    errors::ReportWriteError,
    platform::BrowserSpec,
    report::TestReport,
    runner::{ChunkRunnerBuilder, RunnerCommand},
    upload::{UploadTarget, Uploader},
};
use std::io::Write;
use tracing::info;

/// Collects chunked browser test results and reconciles them into one
/// trustworthy dataset.
#[derive(Debug, Parser)]
#[command(name = "wpt-collector", version, about)]
pub struct WptCollectorApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: CollectorCommand,
}

impl WptCollectorApp {
    /// Executes the app, returning the process exit code.
    pub fn exec(self) -> Result<i32, ExpectedError> {
        self.output.init();
        match self.command {
            CollectorCommand::Run(opts) => opts.exec(),
            CollectorCommand::Verify(opts) => opts.exec(),
            CollectorCommand::Summarize(opts) => opts.exec(),
            CollectorCommand::Upload(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum CollectorCommand {
    /// Collect every chunk of a run, with retries, into the chunk store
    Run(RunOpts),
    /// Verify one report against one raw event log under the threshold
    /// policy, and annotate it with completeness metadata
    Verify(VerifyOpts),
    /// Fold a chunk store into a summary document
    Summarize(SummarizeOpts),
    /// Consolidate a complete chunk store and upload it to the results
    /// receiver
    Upload(UploadOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Path to the run configuration file
    #[arg(long, value_name = "PATH")]
    config: Utf8PathBuf,
}

impl RunOpts {
    fn exec(self) -> Result<i32, ExpectedError> {
        let config = CollectorConfig::from_file(&self.config)?;
        std::fs::create_dir_all(&config.artifacts_dir).map_err(|error| {
            ExpectedError::DirCreate {
                path: config.artifacts_dir.clone(),
                error,
            }
        })?;
        let store = ChunkStore::for_run(&config.store_dir, &config.run_key(), config.total_chunks)?;

        let mut command = RunnerCommand::new(config.runner.program.clone());
        command.args = config.runner.args.clone();
        command.env = config.runner.env.clone();
        let mut builder = ChunkRunnerBuilder::new(command, config.artifacts_dir.clone());
        builder.set_max_attempts(config.max_attempts);
        if let Some(browser) = &config.browser {
            builder.set_browser_check(BrowserSpec {
                binary: browser.binary.clone(),
                version: browser.version.clone(),
            });
        }
        let runner = builder.build()?;
        runner.collect_all(&store)?;

        let summary = store.summarize()?;
        let summary_path = config.artifacts_dir.join("summary.json.zst");
        summary.write_compressed(&summary_path)?;
        info!(tests = summary.len(), path = %summary_path, "wrote summary");

        let results_dir = config.artifacts_dir.join("results");
        let written = store.write_result_files(&results_dir)?;
        info!(files = written, dir = %results_dir, "wrote per-test result files");

        if let Some(upload) = &config.upload {
            let consolidated_path = config.artifacts_dir.join("wpt-report.json.zst");
            let mut consolidator =
                Consolidator::new(store.committed_chunk_files(), config.total_chunks);
            if upload.override_platform {
                let browser = config
                    .browser
                    .as_ref()
                    .ok_or(ExpectedError::MissingPlatformOverride)?;
                consolidator = consolidator.with_overrides(PlatformOverrides {
                    product: browser.product.clone(),
                    browser_version: browser.version.clone(),
                    os: browser.os.clone(),
                    os_version: browser.os_version.clone(),
                });
            }
            if upload.no_timestamps {
                consolidator = consolidator.with_timestamp_policy(TimestampPolicy::Absent);
            }
            consolidator.write_compressed(&consolidated_path)?;

            let uploader = Uploader::new(UploadTarget::new(
                upload.url.clone(),
                upload.user_name.clone(),
                upload.secret.clone(),
            ));
            let labels = vec![upload.git_branch.clone(), upload.browser_channel.clone()];
            let status = uploader.upload(&consolidated_path, &labels)?;
            info!(status, "upload accepted");

            // The store is only torn down after a successful end-to-end
            // run; on failure it is retained for forensic inspection.
            store.remove()?;
        } else {
            info!(dir = %store.dir(), "no upload configured; chunk store retained");
        }

        Ok(CollectorExitCode::OK)
    }
}

#[derive(Debug, Args)]
struct VerifyOpts {
    /// The report file to verify (normalized in place)
    #[arg(long, value_name = "PATH")]
    report: Utf8PathBuf,

    /// The raw event log declaring the expected test set
    #[arg(long = "raw-log", value_name = "PATH")]
    raw_log: Utf8PathBuf,

    /// Acceptable incorrect-result ratio
    #[arg(
        long,
        value_name = "RATIO",
        default_value_t = DEFAULT_THRESHOLD,
        value_parser = parse_threshold,
    )]
    threshold: f64,
}

impl VerifyOpts {
    fn exec(self) -> Result<i32, ExpectedError> {
        let report = TestReport::normalize_file(&self.report)?;
        let expected = ExpectedTests::from_raw_log(&self.raw_log)?;
        let completeness = Completeness::analyze(&expected, &report);
        log_analysis(&completeness);

        annotate_report(&self.report, completeness.summary())?;

        let verdict = completeness.check_threshold(self.threshold);
        if verdict.is_accepted() {
            info!("verification passed");
            Ok(CollectorExitCode::OK)
        } else {
            Err(ExpectedError::VerificationFailed { verdict })
        }
    }
}

#[derive(Debug, Args)]
struct SummarizeOpts {
    /// The chunk store directory
    #[arg(long = "store-dir", value_name = "DIR")]
    store_dir: Utf8PathBuf,

    /// The total number of chunks in the run
    #[arg(long = "total-chunks", value_name = "N")]
    total_chunks: u32,

    /// Write the summary as zstd-compressed JSON here instead of printing
    /// it
    #[arg(long, value_name = "PATH")]
    output: Option<Utf8PathBuf>,
}

impl SummarizeOpts {
    fn exec(self) -> Result<i32, ExpectedError> {
        let store = ChunkStore::new(self.store_dir, self.total_chunks)?;
        let summary = store.summarize()?;

        match &self.output {
            Some(path) => {
                summary.write_compressed(path)?;
                info!(tests = summary.len(), path = %path, "wrote summary");
            }
            None => {
                let json =
                    serde_json::to_string_pretty(&summary).map_err(ReportWriteError::Serialize)?;
                writeln!(std::io::stdout(), "{json}").map_err(ExpectedError::WriteOutput)?;
            }
        }
        Ok(CollectorExitCode::OK)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BrowserChannel {
    Stable,
    Experimental,
}

impl BrowserChannel {
    fn as_str(self) -> &'static str {
        match self {
            BrowserChannel::Stable => "stable",
            BrowserChannel::Experimental => "experimental",
        }
    }
}

#[derive(Debug, Args)]
struct UploadOpts {
    /// The chunk store directory holding the committed chunk files
    #[arg(long = "store-dir", value_name = "DIR")]
    store_dir: Utf8PathBuf,

    /// The total number of chunks in the run
    #[arg(long = "total-chunks", value_name = "N")]
    total_chunks: u32,

    /// The results-receiver URL
    #[arg(long, value_name = "URL")]
    url: String,

    /// The basic-auth user name
    #[arg(long = "user-name", value_name = "NAME")]
    user_name: String,

    /// The basic-auth secret
    #[arg(
        long,
        value_name = "SECRET",
        env = "WPT_COLLECTOR_UPLOAD_SECRET",
        hide_env_values = true
    )]
    secret: String,

    /// The branch label attached to the upload
    #[arg(long = "git-branch", value_name = "BRANCH")]
    git_branch: String,

    /// The channel label attached to the upload
    #[arg(long = "browser-channel", value_enum)]
    browser_channel: BrowserChannel,

    /// Patch the browser/OS identity into the merged run_info
    #[arg(long = "override-platform")]
    override_platform: bool,

    /// The browser product name
    #[arg(long, value_name = "NAME", requires = "override_platform")]
    product: Option<String>,

    /// The browser version
    #[arg(long = "browser-version", value_name = "VERSION", requires = "override_platform")]
    browser_version: Option<String>,

    /// The operating system name
    #[arg(long, value_name = "NAME", requires = "override_platform")]
    os: Option<String>,

    /// The operating system version
    #[arg(long = "os-version", value_name = "VERSION", requires = "override_platform")]
    os_version: Option<String>,

    /// Set when chunk reports do not carry time_start/time_end
    #[arg(long = "no-timestamps")]
    no_timestamps: bool,

    /// Where to write the consolidated document
    /// [default: <STORE_DIR>/wpt-report.json.zst]
    #[arg(long, value_name = "PATH")]
    output: Option<Utf8PathBuf>,
}

impl UploadOpts {
    fn exec(self) -> Result<i32, ExpectedError> {
        let store = ChunkStore::new(self.store_dir.clone(), self.total_chunks)?;
        let chunk_files = store.committed_chunk_files();
        info!(
            expected = self.total_chunks,
            found = chunk_files.len(),
            "checking results files",
        );

        let mut consolidator = Consolidator::new(chunk_files, self.total_chunks);
        if self.override_platform {
            let overrides = match (&self.product, &self.browser_version, &self.os, &self.os_version)
            {
                (Some(product), Some(browser_version), Some(os), Some(os_version)) => {
                    PlatformOverrides {
                        product: product.clone(),
                        browser_version: browser_version.clone(),
                        os: os.clone(),
                        os_version: os_version.clone(),
                    }
                }
                _ => return Err(ExpectedError::MissingPlatformOverride),
            };
            consolidator = consolidator.with_overrides(overrides);
        }
        if self.no_timestamps {
            consolidator = consolidator.with_timestamp_policy(TimestampPolicy::Absent);
        }

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| self.store_dir.join("wpt-report.json.zst"));
        consolidator.write_compressed(&output)?;

        let uploader = Uploader::new(UploadTarget::new(self.url, self.user_name, self.secret));
        let labels = vec![self.git_branch, self.browser_channel.as_str().to_owned()];
        let status = uploader.upload(&output, &labels)?;
        info!(status, "upload accepted");

        Ok(CollectorExitCode::OK)
    }
}

fn parse_threshold(input: &str) -> Result<f64, String> {
    let value: f64 = input
        .parse()
        .map_err(|error| format!("not a number: {error}"))?;
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(format!("threshold {value} must be within (0, 1]"))
    }
}

fn log_analysis(completeness: &Completeness) {
    info!(expected = completeness.total_expected, "expected results");
    info!(actual = completeness.total_actual, "found results");
    info!(count = completeness.unexpected.len(), "unexpected results");
    for test in &completeness.unexpected {
        info!("- {test}");
    }
    info!(count = completeness.missing.len(), "missing results");
    for test in &completeness.missing {
        info!("- {test}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        WptCollectorApp::command().debug_assert();
    }

    #[test]
    fn threshold_parser_bounds() {
        parse_threshold("0.02").unwrap();
        parse_threshold("1").unwrap();
        parse_threshold("0").unwrap_err();
        parse_threshold("1.5").unwrap_err();
        parse_threshold("abc").unwrap_err();
    }
}
