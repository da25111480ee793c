// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for incremental-junit.
//!
//! Configuration is layered: the defaults in `default-config.toml`, then an optional config file,
//! then environment variables prefixed with `INCREMENTAL_JUNIT__` (for example
//! `INCREMENTAL_JUNIT__REPORT__PATH` or `INCREMENTAL_JUNIT__TRACKER__URL`).

use crate::{
    accumulator::Strategy,
    errors::{ConfigParseError, ConfigParseErrorKind},
    session::RunTopology,
    tracker::TrackerCredentials,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, Environment, File, FileFormat, Map};
use debug_ignore::DebugIgnore;
use serde::Deserialize;
use std::{collections::BTreeSet, fmt, time::Duration};
use tracing::warn;

/// The prefix of environment variables overriding configuration.
pub static ENV_PREFIX: &str = "INCREMENTAL_JUNIT";

/// The top-level configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncrementalJunitConfig {
    /// Report settings.
    pub report: ReportSettings,

    /// Issue tracker settings.
    pub tracker: TrackerSettings,
}

impl IncrementalJunitConfig {
    /// The default configuration, embedded at build time.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the configuration from the defaults, an optional config file and the environment.
    ///
    /// Unknown keys are warned about and otherwise ignored.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(config_file, None, |config_file, unknown| {
            let source = match config_file {
                Some(config_file) => format!("config file {config_file}"),
                None => "environment".to_owned(),
            };
            let unknown: Vec<_> = unknown.iter().map(String::as_str).collect();
            warn!("ignoring unknown configuration keys in {source}: {}", unknown.join(", "));
        })
    }

    // The environment can be replaced and a custom unknown_callback passed in while testing.
    fn from_sources_impl(
        config_file: Option<&Utf8Path>,
        env: Option<Map<String, String>>,
        mut unknown_callback: impl FnMut(Option<&Utf8Path>, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let mut builder =
            Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .source(env),
        );

        let config_file_owned = config_file.map(Utf8Path::to_path_buf);
        let config = builder.build().map_err(|error| {
            ConfigParseError::new(
                config_file_owned.clone(),
                ConfigParseErrorKind::BuildError(Box::new(error)),
            )
        })?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let this: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // The config crate also reports the key. It's dropped here since
            // serde_path_to_error already tracks it.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseError::new(
                config_file_owned.clone(),
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                ))),
            )
        })?;

        if !ignored.is_empty() {
            unknown_callback(config_file, &ignored);
        }
        Ok(this)
    }
}

/// Settings for the report itself.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportSettings {
    /// The report path. Reporting is disabled if unset.
    #[serde(default)]
    pub path: Option<Utf8PathBuf>,

    /// Where the fragment store is created. Defaults to the report's directory.
    #[serde(default)]
    pub work_dir: Option<Utf8PathBuf>,

    /// The name of the test suite.
    pub suite_name: String,

    /// The accumulation strategy.
    pub strategy: StrategySetting,

    /// How long to wait for the report lock.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// How long to wait between lock attempts.
    #[serde(with = "humantime_serde")]
    pub lock_poll_interval: Duration,

    /// The `type` attribute of skipped elements.
    pub skip_type: String,

    /// Markers identifying the host runner's internal trace lines.
    pub internal_frame_markers: Vec<String>,

    /// The environment variable marking worker processes.
    pub worker_env_var: String,
}

/// The configured accumulation strategy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategySetting {
    /// Pick a strategy based on the run topology.
    Auto,

    /// Always append in place.
    Append,

    /// Always collect fragments and merge at the end.
    Collect,
}

impl StrategySetting {
    /// Resolves the strategy for a run.
    pub fn resolve(self, topology: RunTopology) -> Strategy {
        match (self, topology) {
            (Self::Append, _) | (Self::Auto, RunTopology::Single) => Strategy::Append,
            (Self::Collect, _) | (Self::Auto, RunTopology::Distributed) => Strategy::Collect,
        }
    }
}

/// Settings for the optional issue tracker.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrackerSettings {
    /// The tracker URL.
    #[serde(default)]
    pub url: Option<String>,

    /// The user name.
    #[serde(default)]
    pub username: Option<String>,

    /// The password or API token.
    #[serde(default)]
    pub password: Option<String>,

    /// The number of connection attempts.
    pub connect_attempts: u32,

    /// The wait after a failed connection attempt.
    #[serde(with = "humantime_serde")]
    pub connect_backoff: Duration,
}

impl TrackerSettings {
    /// Returns the credentials if the URL, user name and password are all set.
    pub fn credentials(&self) -> Option<TrackerCredentials> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        Some(TrackerCredentials {
            url: non_empty(&self.url)?,
            username: non_empty(&self.username)?,
            password: DebugIgnore(non_empty(&self.password)?),
        })
    }
}

impl fmt::Debug for TrackerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_backoff", &self.connect_backoff)
            .finish()
    }
}
