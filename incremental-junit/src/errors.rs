// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by incremental-junit.
//!
//! None of these errors is meant to abort the underlying test run. Most are logged and
//! swallowed where they occur; the ones returned to callers only affect the report.

use camino::Utf8PathBuf;
use config::ConfigError;
use junit_report::{DeserializeError, SerializeError};
use std::{error::Error, fmt, io, time::Duration};
use thiserror::Error;

/// An error returned by collaborators: enrichers, issue trackers and tracker connectors.
pub type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error(
    "failed to parse incremental-junit config{}",
    .config_file.as_ref().map(|f| format!(" at `{f}`")).unwrap_or_default()
)]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the config file that failed to parse, if any.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`] that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config from its sources.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurred while acquiring the report lock.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LockError {
    /// The lock was held by someone else for longer than the timeout.
    #[error("timed out after {timeout:?} waiting for lock `{path}`")]
    Timeout {
        /// The sentinel path.
        path: Utf8PathBuf,

        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The sentinel could not be created for a reason other than it already existing.
    #[error("error creating lock sentinel `{path}`")]
    Create {
        /// The sentinel path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

impl LockError {
    /// Returns true if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// An error that occurred while managing the fragment store directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FragmentStoreError {
    /// Stale contents could not be removed.
    #[error("error purging fragment store `{dir}`")]
    Purge {
        /// The fragment store directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The directory could not be created.
    #[error("error creating fragment store `{dir}`")]
    Create {
        /// The fragment store directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The directory could not be listed.
    #[error("error listing fragment store `{dir}`")]
    List {
        /// The fragment store directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The directory could not be removed after a merge.
    #[error("error removing fragment store `{dir}`")]
    Remove {
        /// The fragment store directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while writing a single fragment.
///
/// This only affects the one test case being recorded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FragmentWriteError {
    /// The fragment store directory could not be created.
    #[error("error preparing fragment store")]
    Store(#[from] FragmentStoreError),

    /// The test case could not be serialized.
    #[error("error serializing fragment `{path}`")]
    Serialize {
        /// The fragment path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: SerializeError,
    },

    /// The fragment could not be written.
    #[error("error writing fragment `{path}`")]
    Write {
        /// The fragment path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// A fragment could not be read back during a merge. The fragment is skipped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FragmentParseError {
    /// The fragment could not be read.
    #[error("error reading fragment `{path}`")]
    Read {
        /// The fragment path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The fragment is corrupt or truncated.
    #[error("error parsing fragment `{path}`")]
    Deserialize {
        /// The fragment path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: DeserializeError,
    },
}

/// The existing report could not be read back for an append. The report is reinitialized.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportParseError {
    /// The report could not be read.
    #[error("error reading report `{path}`")]
    Read {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The report is corrupt or truncated.
    #[error("error parsing report `{path}`")]
    Deserialize {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: DeserializeError,
    },
}

/// An error that occurred while appending to or merging into the report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccumulateError {
    /// The lock could not be acquired. The existing report is untouched.
    #[error("error acquiring report lock")]
    Lock(#[from] LockError),

    /// The directory containing the report could not be created.
    #[error("error creating report directory `{dir}`")]
    ReportDirCreate {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The report could not be serialized.
    #[error("error serializing report `{path}`")]
    Serialize {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: SerializeError,
    },

    /// The report could not be written.
    #[error("error writing report `{path}`")]
    Write {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The fragment store could not be listed or removed.
    #[error("error accessing fragment store")]
    FragmentStore(#[from] FragmentStoreError),
}

impl AccumulateError {
    /// Returns true if this error was caused by a lock timeout.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(error) if error.is_timeout())
    }
}

/// A line of host events could not be read or parsed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostEventParseError {
    /// The line could not be read.
    #[error("error reading host event at line {line_number}")]
    Read {
        /// The 1-based line number.
        line_number: usize,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The line is not a valid event.
    #[error("error parsing host event at line {line_number}")]
    Deserialize {
        /// The 1-based line number.
        line_number: usize,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while recording a test case.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecordError {
    /// The fragment could not be written.
    #[error("error writing fragment")]
    Fragment(#[from] FragmentWriteError),

    /// The test case could not be appended to the report.
    #[error("error appending test case to report")]
    Append(#[from] AccumulateError),
}

/// An error that occurred at a session lifecycle boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The fragment store could not be initialized.
    #[error("error initializing fragment store")]
    FragmentStore(#[from] FragmentStoreError),

    /// The report could not be initialized or merged.
    #[error("error writing report")]
    Accumulate(#[from] AccumulateError),

    /// The signal handler could not be set up.
    #[error("error setting up signal handler")]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),
}

impl SessionError {
    /// Returns true if the report lock couldn't be acquired in time.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Accumulate(error) if error.is_lock_timeout())
    }
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// A collaborator failed to contribute enrichment data. Logged; never fatal.
#[derive(Debug, Error)]
#[error("enricher `{enricher}` failed")]
pub struct EnrichmentError {
    enricher: String,
    #[source]
    error: BoxedError,
}

impl EnrichmentError {
    pub(crate) fn new(enricher: impl Into<String>, error: BoxedError) -> Self {
        Self {
            enricher: enricher.into(),
            error,
        }
    }
}

/// The issue tracker could not be reached after all attempts. The integration is disabled.
#[derive(Debug, Error)]
#[error("could not connect to issue tracker at `{url}` after {attempts} attempts")]
pub struct TrackerConnectError {
    url: String,
    attempts: u32,
    #[source]
    last_error: BoxedError,
}

impl TrackerConnectError {
    pub(crate) fn new(url: impl Into<String>, attempts: u32, last_error: BoxedError) -> Self {
        Self {
            url: url.into(),
            attempts,
            last_error,
        }
    }
}

/// Displays an error along with its chain of sources, for log messages.
pub struct DisplayErrorChain<E>(E);

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        if source.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(error) = source {
            write!(f, "\n  - {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
