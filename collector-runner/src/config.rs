// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicit run configuration.
//!
//! Every component takes its settings as a value; nothing in this crate
//! reads process-global environment state. A full run is described by one
//! [`CollectorConfig`], typically loaded from a TOML file by the CLI.

use crate::{
    chunk_store::RunKey,
    completeness::DEFAULT_THRESHOLD,
    errors::ConfigError,
    runner::DEFAULT_MAX_ATTEMPTS,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{collections::BTreeMap, fs};

/// Configuration for one full collection run.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    /// The revision of the test suite under test.
    pub revision: String,
    /// The identifier of the browser/OS combination.
    pub platform_id: String,
    /// The number of chunks the suite is split into.
    pub total_chunks: u32,
    /// The attempt bound per chunk.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// The acceptable incorrect-result ratio for threshold verification.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Base directory under which per-run chunk stores are created.
    pub store_dir: Utf8PathBuf,
    /// Directory for per-attempt artifacts and derived outputs.
    pub artifacts_dir: Utf8PathBuf,
    /// How to invoke the external test runner.
    pub runner: RunnerSettings,
    /// The browser identity, if the preflight check or platform overrides
    /// are wanted.
    #[serde(default)]
    pub browser: Option<BrowserSettings>,
    /// The results receiver, if the run should upload on completion.
    #[serde(default)]
    pub upload: Option<UploadSettings>,
}

/// The `[runner]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    /// The runner executable.
    pub program: Utf8PathBuf,
    /// Pass-through arguments handed to the runner verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment entries set explicitly for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The `[browser]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserSettings {
    /// The browser binary, probed by the preflight check.
    pub binary: Utf8PathBuf,
    /// The version the run is labelled with.
    pub version: String,
    /// The product name, e.g. `firefox`.
    pub product: String,
    /// The operating system name.
    pub os: String,
    /// The operating system version.
    pub os_version: String,
}

/// The `[upload]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadSettings {
    /// The results-receiver URL.
    pub url: String,
    /// The basic-auth user name.
    pub user_name: String,
    /// The basic-auth secret.
    pub secret: String,
    /// The branch label attached to the upload.
    pub git_branch: String,
    /// The channel label attached to the upload.
    pub browser_channel: String,
    /// Whether to patch the `[browser]` identity into the merged
    /// `run_info`.
    #[serde(default)]
    pub override_platform: bool,
    /// Whether chunk reports lack `time_start`/`time_end`.
    #[serde(default)]
    pub no_timestamps: bool,
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl CollectorConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_owned(),
            error,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|error| ConfigError::Parse {
            path: path.to_owned(),
            error: Box::new(error),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_chunks == 0 {
            return Err(ConfigError::InvalidTotalChunks);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold {
                value: self.threshold,
            });
        }
        if let Some(upload) = &self.upload {
            if upload.override_platform && self.browser.is_none() {
                return Err(ConfigError::MissingBrowserSection);
            }
        }
        Ok(())
    }

    /// The run identity, keying the chunk store directory.
    pub fn run_key(&self) -> RunKey {
        RunKey {
            revision: self.revision.clone(),
            platform_id: self.platform_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const FULL_CONFIG: &str = indoc! {r#"
        revision = "0123abcd"
        platform_id = "firefox-115.0-linux-22.04"
        total_chunks = 20
        max_attempts = 5
        threshold = 0.05
        store_dir = "/var/lib/wpt-collector/chunks"
        artifacts_dir = "/var/lib/wpt-collector/artifacts"

        [runner]
        program = "/usr/local/bin/wpt"
        args = ["run", "--product", "firefox"]

        [runner.env]
        no_proxy = "*"

        [browser]
        binary = "/usr/bin/firefox"
        version = "115.0"
        product = "firefox"
        os = "linux"
        os_version = "22.04"

        [upload]
        url = "https://wpt.example/api/results/upload"
        user_name = "uploader"
        secret = "hunter2"
        git_branch = "master"
        browser_channel = "stable"
        override_platform = true
    "#};

    #[test]
    fn parses_full_config() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("collector.toml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        let config = CollectorConfig::from_file(&path).unwrap();
        assert_eq!(config.total_chunks, 20);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.threshold, 0.05);
        assert_eq!(config.runner.env["no_proxy"], "*");
        assert_eq!(
            config.run_key().dir_name(),
            "0123abcd-firefox-115.0-linux-22.04",
        );
        let upload = config.upload.as_ref().unwrap();
        assert!(upload.override_platform);
        assert!(!upload.no_timestamps);
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let minimal = indoc! {r#"
            revision = "0123abcd"
            platform_id = "firefox-115.0-linux-22.04"
            total_chunks = 4
            store_dir = "/tmp/chunks"
            artifacts_dir = "/tmp/artifacts"

            [runner]
            program = "/usr/local/bin/wpt"
        "#};
        let config: CollectorConfig = toml::from_str(minimal).unwrap();
        config.validate().unwrap();
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert!(config.browser.is_none());
        assert!(config.upload.is_none());
    }

    #[test]
    fn rejects_zero_total_chunks() {
        let mut config: CollectorConfig = toml::from_str(FULL_CONFIG).unwrap();
        config.total_chunks = 0;
        match config.validate().unwrap_err() {
            ConfigError::InvalidTotalChunks => {}
            other => panic!("expected InvalidTotalChunks, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config: CollectorConfig = toml::from_str(FULL_CONFIG).unwrap();
        for value in [0.0, -0.5, 1.5] {
            config.threshold = value;
            match config.validate().unwrap_err() {
                ConfigError::InvalidThreshold { .. } => {}
                other => panic!("expected InvalidThreshold, got {other:?}"),
            }
        }
    }

    #[test]
    fn override_platform_requires_browser_section() {
        let mut config: CollectorConfig = toml::from_str(FULL_CONFIG).unwrap();
        config.browser = None;
        match config.validate().unwrap_err() {
            ConfigError::MissingBrowserSection => {}
            other => panic!("expected MissingBrowserSection, got {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let bad = format!("{FULL_CONFIG}\nbogus_key = true\n");
        toml::from_str::<CollectorConfig>(&bad).unwrap_err();
    }
}
