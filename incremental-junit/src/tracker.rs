// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional issue-tracker annotation of failures.
//!
//! Every failure gets a stable failure id derived from the test's identity and its failure
//! message. If an issue tracker is connected and one of its issues mentions the id
//! (`testid#<id>`), the failure message is replaced with a short description of that issue.
//! Otherwise the id is appended to the message so that an issue can be filed against it later.
//!
//! No tracker client ships with this crate: hosts provide one through [`TrackerConnector`].

use crate::errors::{BoxedError, DisplayErrorChain, TrackerConnectError};
use debug_ignore::DebugIgnore;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{
    fmt,
    sync::LazyLock,
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

static PARAMETRIZATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.+\]$").expect("parametrization regex is valid"));

/// The credentials used to connect to an issue tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerCredentials {
    /// The base URL of the tracker.
    pub url: String,

    /// The user to authenticate as.
    pub username: String,

    /// The password or API token.
    pub password: DebugIgnore<String>,
}

/// An issue found by an [`IssueTracker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownIssue {
    /// A link to the issue.
    pub permalink: String,

    /// The issue type, e.g. `Bug`.
    pub issue_type: String,

    /// The issue summary.
    pub summary: String,

    /// The workflow status name, e.g. `Closed`.
    pub status: String,
}

impl KnownIssue {
    /// Returns the annotation for a failure linked to this issue.
    pub fn annotation(&self) -> String {
        format!(
            "{} {} {} [{}]",
            IssueResolution::from_status(&self.status),
            self.permalink,
            self.issue_type,
            self.summary,
        )
    }
}

/// What a recurring failure means, given the status of its issue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IssueResolution {
    /// The issue was verified or closed, yet the failure is back.
    NeedToReopen,

    /// The fix is in a branch that hasn't landed here yet.
    ResolvedInBranch,

    /// The issue is still open.
    KnownIssue,
}

impl IssueResolution {
    /// Maps a tracker status name to a resolution.
    pub fn from_status(status: &str) -> Self {
        match status {
            "Verified" | "Closed" => Self::NeedToReopen,
            "Resolved" | "In Testing" => Self::ResolvedInBranch,
            _ => Self::KnownIssue,
        }
    }
}

impl fmt::Display for IssueResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeedToReopen => write!(f, "Need to reopen"),
            Self::ResolvedInBranch => write!(f, "Resolved in branch"),
            Self::KnownIssue => write!(f, "Known issue"),
        }
    }
}

/// Looks up issues by failure id.
pub trait IssueTracker: Send + Sync {
    /// Returns the most recently updated issue whose description matches `query`, if any.
    ///
    /// `query` is built by [`search_query`].
    fn search(&self, query: &str) -> Result<Option<KnownIssue>, BoxedError>;
}

/// Connects to an issue tracker.
pub trait TrackerConnector: Send + Sync {
    /// Makes a single connection attempt.
    fn connect(&self, credentials: &TrackerCredentials) -> Result<Box<dyn IssueTracker>, BoxedError>;
}

/// Computes the failure id for a test failure.
///
/// Parametrization (a trailing `[...]`) is removed from `name`, so that every parameter of a test
/// failing with the same message shares an id.
pub fn failure_id(classname: &str, name: &str, message: &str) -> String {
    let name = PARAMETRIZATION_REGEX.replace(name, "");
    let digest = Sha256::digest(format!("{classname}.{name}.{message}").as_bytes());
    hex::encode(digest)
}

/// Returns the tracker query matching issues that mention `failure_id`.
pub fn search_query(failure_id: &str) -> String {
    format!("description ~ \"testid#{failure_id}\" ORDER BY updated")
}

/// Connects to a tracker, making up to `attempts` attempts with `backoff` between them.
pub fn connect_with_retries(
    connector: &dyn TrackerConnector,
    credentials: &TrackerCredentials,
    attempts: u32,
    backoff: Duration,
) -> Result<Box<dyn IssueTracker>, TrackerConnectError> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match connector.connect(credentials) {
            Ok(tracker) => {
                info!(url = %credentials.url, attempt, "connected to issue tracker");
                return Ok(tracker);
            }
            Err(error) => {
                warn!(url = %credentials.url, attempt, %error, "issue tracker connection attempt failed");
                last_error = Some(error);
                thread::sleep(backoff);
            }
        }
    }

    let last_error = last_error.unwrap_or_else(|| "no connection attempts were made".into());
    Err(TrackerConnectError::new(&credentials.url, attempts, last_error))
}

/// Annotates failure messages.
#[derive(Default)]
pub struct FailureAnnotator {
    tracker: Option<Box<dyn IssueTracker>>,
}

impl FailureAnnotator {
    /// Creates an annotator that looks failures up in `tracker`.
    pub fn new(tracker: Box<dyn IssueTracker>) -> Self {
        Self {
            tracker: Some(tracker),
        }
    }

    /// Creates an annotator without a tracker: every failure is treated as not found.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Returns true if a tracker is connected.
    pub fn is_connected(&self) -> bool {
        self.tracker.is_some()
    }

    /// Returns the message to record for a failure.
    pub fn annotate(&self, classname: &str, name: &str, message: &str) -> String {
        let failure_id = failure_id(classname, name, message);
        match self.lookup(&failure_id) {
            Some(issue) => issue.annotation(),
            None => format!("{message}@@testid#{failure_id}"),
        }
    }

    fn lookup(&self, failure_id: &str) -> Option<KnownIssue> {
        let tracker = self.tracker.as_ref()?;
        match tracker.search(&search_query(failure_id)) {
            Ok(issue) => {
                debug!(failure_id, found = issue.is_some(), "searched issue tracker");
                issue
            }
            Err(error) => {
                warn!(
                    failure_id,
                    "issue tracker search failed: {}",
                    DisplayErrorChain::new(error.as_ref()),
                );
                None
            }
        }
    }
}

impl fmt::Debug for FailureAnnotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureAnnotator")
            .field("connected", &self.is_connected())
            .finish()
    }
}
