// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use camino::Utf8PathBuf;
use incremental_junit::errors::{ConfigParseError, SessionError};
use owo_colors::{OwoColorize, Stream};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Process exit codes used by `ijunit`.
#[doc(hidden)]
pub enum IjunitExitCode {}

impl IjunitExitCode {
    /// The command ran successfully.
    pub const OK: i32 = 0;

    /// Some test results couldn't be recorded.
    pub const RECORD_FAILED: i32 = 100;

    /// The report couldn't be written.
    pub const WRITE_FAILED: i32 = 101;

    /// The report lock couldn't be acquired in time.
    pub const LOCK_TIMEOUT: i32 = 102;

    /// Configuration or arguments were invalid.
    pub const SETUP_ERROR: i32 = 96;
}

// The #[error()] strings are placeholders: errors are meant to be printed with display_to_stderr.

/// An error that `ijunit` knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParse {
        #[from]
        err: ConfigParseError,
    },
    #[error("no report path")]
    ReportPathMissing,
    #[error("events file could not be opened")]
    EventsOpen {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("session error")]
    Session {
        report: Utf8PathBuf,
        #[source]
        err: SessionError,
    },
    #[error("failed to record {failed} test results")]
    RecordFailed { failed: usize },
}

impl ExpectedError {
    pub(crate) fn session(report: impl Into<Utf8PathBuf>, err: SessionError) -> Self {
        Self::Session {
            report: report.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParse { .. } | Self::ReportPathMissing | Self::EventsOpen { .. } => {
                IjunitExitCode::SETUP_ERROR
            }
            Self::Session { err, .. } if err.is_lock_timeout() => IjunitExitCode::LOCK_TIMEOUT,
            Self::Session { .. } => IjunitExitCode::WRITE_FAILED,
            Self::RecordFailed { .. } => IjunitExitCode::RECORD_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::ConfigParse { err } => {
                match err.config_file() {
                    Some(config_file) => error!(
                        "failed to parse config file at {}",
                        config_file.if_supports_color(Stream::Stderr, |x| x.bold()),
                    ),
                    None => error!("failed to parse configuration"),
                }
                err.source()
            }
            Self::ReportPathMissing => {
                error!(
                    "no report path: pass {} or set {} in the configuration",
                    "--report".if_supports_color(Stream::Stderr, |x| x.bold()),
                    "report.path".if_supports_color(Stream::Stderr, |x| x.bold()),
                );
                None
            }
            Self::EventsOpen { path, err } => {
                error!(
                    "failed to open events file {}",
                    path.if_supports_color(Stream::Stderr, |x| x.bold()),
                );
                Some(err as &dyn Error)
            }
            Self::Session { report, err } => {
                error!(
                    "failed to write report {}",
                    report.if_supports_color(Stream::Stderr, |x| x.bold()),
                );
                Some(err as &dyn Error)
            }
            Self::RecordFailed { failed } => {
                error!("failed to record {failed} test results (see warnings above)");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
