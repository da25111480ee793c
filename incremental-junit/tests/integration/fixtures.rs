// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use color_eyre::eyre::{Result, WrapErr};
use debug_ignore::DebugIgnore;
use incremental_junit::{
    enrichment::{CompletedTest, Enricher},
    errors::BoxedError,
    events::{HostEvent, HostEventReader},
    lock::ReportLock,
    metadata::HostIdentity,
    session::ReportSession,
    tracker::{IssueTracker, KnownIssue, TrackerConnector, TrackerCredentials},
};
use junit_report::{Property, Report};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

pub(crate) fn host() -> HostIdentity {
    HostIdentity::new("ci-box-3", "10.1.2.3")
}

pub(crate) fn credentials() -> TrackerCredentials {
    TrackerCredentials {
        url: "https://tracker.example".to_owned(),
        username: "ci-bot".to_owned(),
        password: DebugIgnore("hunter2".to_owned()),
    }
}

pub(crate) fn read_report(path: &Utf8Path) -> Result<Report> {
    let xml = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {path}"))?;
    Ok(Report::deserialize_str(&xml)?)
}

/// Feeds JSON-lines host events to a session, the way a host runner plugin would.
pub(crate) fn feed<L: ReportLock + 'static>(
    session: &mut ReportSession<L>,
    json_lines: &str,
) -> Result<()> {
    for event in HostEventReader::new(json_lines.as_bytes()) {
        match event? {
            HostEvent::Report(report) => session.on_test_report(report),
            HostEvent::Teardown(teardown) => {
                session.on_teardown(&teardown)?;
            }
        }
    }
    Ok(())
}

/// Contributes a build number to the session and the worker tag to each test.
#[derive(Debug)]
pub(crate) struct BuildInfo {
    pub(crate) build: &'static str,
}

impl Enricher for BuildInfo {
    fn name(&self) -> &str {
        "build-info"
    }

    fn session_metadata(&self) -> Result<Vec<Property>, BoxedError> {
        Ok(vec![Property::new("build", self.build)])
    }

    fn test_case_properties(&self, test: &CompletedTest<'_>) -> Result<Vec<Property>, BoxedError> {
        Ok(vec![Property::new("node_id", test.node_id())])
    }
}

/// An enricher that always fails.
#[derive(Debug)]
pub(crate) struct Broken;

impl Enricher for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn session_metadata(&self) -> Result<Vec<Property>, BoxedError> {
        Err("metadata service unavailable".into())
    }

    fn test_case_properties(&self, _test: &CompletedTest<'_>) -> Result<Vec<Property>, BoxedError> {
        Err("metadata service unavailable".into())
    }
}

/// A tracker answering queries from a fixed set of issues, keyed by query.
#[derive(Clone, Debug, Default)]
pub(crate) struct FixedTracker {
    issues: Arc<HashMap<String, KnownIssue>>,
    searches: Arc<AtomicU32>,
}

impl FixedTracker {
    pub(crate) fn new(issues: impl IntoIterator<Item = (String, KnownIssue)>) -> Self {
        Self {
            issues: Arc::new(issues.into_iter().collect()),
            searches: Arc::default(),
        }
    }

    pub(crate) fn searches(&self) -> u32 {
        self.searches.load(Ordering::SeqCst)
    }
}

impl IssueTracker for FixedTracker {
    fn search(&self, query: &str) -> Result<Option<KnownIssue>, BoxedError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.issues.get(query).cloned())
    }
}

/// Connects to a [`FixedTracker`] after a number of failed attempts.
#[derive(Debug)]
pub(crate) struct FlakyConnector {
    tracker: FixedTracker,
    failures_left: AtomicU32,
    attempts: Arc<AtomicU32>,
}

impl FlakyConnector {
    pub(crate) fn new(tracker: FixedTracker, failures: u32) -> Self {
        Self {
            tracker,
            failures_left: AtomicU32::new(failures),
            attempts: Arc::default(),
        }
    }

    pub(crate) fn attempts(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }
}

impl TrackerConnector for FlakyConnector {
    fn connect(
        &self,
        credentials: &TrackerCredentials,
    ) -> Result<Box<dyn IssueTracker>, BoxedError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(format!("connection to {} refused", credentials.url).into());
        }
        Ok(Box::new(self.tracker.clone()))
    }
}
