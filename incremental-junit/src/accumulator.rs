// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maintaining the report document on disk.
//!
//! Two strategies are supported:
//!
//! * **Append-in-place**: every completed test case is appended to the report right away. The
//!   report is re-read, extended and rewritten under the report lock each time, so it is always
//!   complete up to the last recorded test.
//! * **Collect-then-merge**: test cases are only written as fragments while the run executes.
//!   At the end of the run, a single terminal [merge](Accumulator::merge) folds every fragment
//!   into a fresh report and removes the fragment store.
//!
//! Either way the report is written to a temporary file first and atomically renamed over the
//! target, so readers never see a partially written document.

use crate::{
    errors::{AccumulateError, DisplayErrorChain, ReportParseError},
    fragment::{FragmentStore, read_fragment},
    lock::{ReportLock, SentinelLock},
    metadata::MetadataSource,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use junit_report::{Report, SuiteCounts, TestCase, TestSuite};
use std::{fs, io, sync::Mutex};
use tracing::{debug, info, warn};

/// The default name of the test suite.
pub static DEFAULT_SUITE_NAME: &str = "tests";

/// How test cases make their way into the report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Strategy {
    /// Each test case is appended to the report as soon as it completes.
    Append,

    /// Test cases are written as fragments and merged once at the end of the run.
    Collect,
}

/// The result of a call to [`Accumulator::merge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge was performed by this call.
    Merged(MergeSummary),

    /// A merge was already performed or attempted in this process. Nothing was done.
    AlreadyMerged,
}

/// Statistics about a terminal merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSummary {
    /// The report that was written.
    pub report_path: Utf8PathBuf,

    /// The counters of the written report.
    pub counts: SuiteCounts,

    /// The number of fragments merged into the report.
    pub fragments_merged: usize,

    /// The number of fragments that could not be read and were skipped.
    pub fragments_skipped: usize,
}

/// Owns the report document at a path.
///
/// The accumulator is shared between the session and the signal watcher, so it is `Sync`: the
/// merge guard is internally synchronized.
#[derive(Debug)]
pub struct Accumulator<L = SentinelLock> {
    report_path: Utf8PathBuf,
    suite_name: String,
    lock: L,
    store: FragmentStore,
    metadata: MetadataSource,
    merged: Mutex<bool>,
}

impl Accumulator<SentinelLock> {
    /// Creates an accumulator for the given report, locked with a [`SentinelLock`] next to it.
    pub fn new(report_path: impl Into<Utf8PathBuf>) -> Self {
        let report_path = report_path.into();
        let lock = SentinelLock::for_report(&report_path);
        Self::with_lock(report_path, lock)
    }
}

impl<L: ReportLock> Accumulator<L> {
    /// Creates an accumulator with a custom lock.
    pub fn with_lock(report_path: impl Into<Utf8PathBuf>, lock: L) -> Self {
        let report_path = report_path.into();
        let store = FragmentStore::for_report(&report_path, None);
        Self {
            report_path,
            suite_name: DEFAULT_SUITE_NAME.to_owned(),
            lock,
            store,
            metadata: MetadataSource::default(),
            merged: Mutex::new(false),
        }
    }

    /// Sets the name of the test suite in fresh documents.
    pub fn set_suite_name(&mut self, suite_name: impl Into<String>) -> &mut Self {
        self.suite_name = suite_name.into();
        self
    }

    /// Sets the fragment store merged by [`merge`](Self::merge).
    pub fn set_store(&mut self, store: FragmentStore) -> &mut Self {
        self.store = store;
        self
    }

    /// Sets where session metadata comes from.
    pub fn set_metadata(&mut self, metadata: MetadataSource) -> &mut Self {
        self.metadata = metadata;
        self
    }

    /// Returns the report path.
    pub fn report_path(&self) -> &Utf8Path {
        &self.report_path
    }

    /// Returns the fragment store.
    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// Returns the metadata source.
    pub fn metadata(&self) -> &MetadataSource {
        &self.metadata
    }

    /// Writes a fresh document with no test cases, replacing any previous report.
    pub fn initialize(&self) -> Result<(), AccumulateError> {
        self.ensure_report_dir()?;
        let _guard = self.lock.acquire()?;
        let report = self.fresh_report();
        self.write_report(&report)?;
        info!(path = %self.report_path, "initialized report");
        Ok(())
    }

    /// Appends a test case to the report, returning the new counters.
    ///
    /// A missing report is created. A report that can't be read back is replaced by a fresh
    /// document, losing its previous contents.
    pub fn append(&self, test_case: TestCase) -> Result<SuiteCounts, AccumulateError> {
        self.ensure_report_dir()?;
        let _guard = self.lock.acquire()?;

        let mut report = match self.read_report() {
            Ok(Some(report)) => report,
            Ok(None) => {
                debug!(path = %self.report_path, "report does not exist, creating it");
                self.fresh_report()
            }
            Err(error) => {
                warn!(
                    "reinitializing unreadable report: {}",
                    DisplayErrorChain::new(&error),
                );
                self.fresh_report()
            }
        };

        debug!(
            classname = %test_case.classname,
            name = %test_case.name,
            "appending test case to report",
        );
        report.test_suite.add_test_case(test_case);
        self.write_report(&report)?;
        Ok(report.test_suite.counts())
    }

    /// Merges every fragment into a fresh report, then removes the fragment store.
    ///
    /// Only the first call in a process does anything, even if it fails: later calls return
    /// [`MergeOutcome::AlreadyMerged`]. A call made while a merge is in progress on another
    /// thread waits for it to complete.
    pub fn merge(&self) -> Result<MergeOutcome, AccumulateError> {
        // Poisoning is ignored: the flag is set before anything can panic.
        let mut merged = self
            .merged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *merged {
            debug!(path = %self.report_path, "report already merged");
            return Ok(MergeOutcome::AlreadyMerged);
        }
        *merged = true;

        self.ensure_report_dir()?;
        let summary = {
            let _guard = self.lock.acquire()?;
            self.merge_locked()?
        };

        // Removed after the lock is released. The report is already complete here.
        if let Err(error) = self.store.remove() {
            warn!("{}", DisplayErrorChain::new(&error));
        }

        info!(
            path = %summary.report_path,
            tests = summary.counts.tests,
            failures = summary.counts.failures,
            errors = summary.counts.errors,
            skipped = summary.counts.skipped,
            fragments_skipped = summary.fragments_skipped,
            "merged report",
        );
        Ok(MergeOutcome::Merged(summary))
    }

    /// Returns true if a merge was performed or attempted in this process.
    pub fn is_merged(&self) -> bool {
        *self
            .merged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn merge_locked(&self) -> Result<MergeSummary, AccumulateError> {
        let mut report = self.fresh_report();
        let mut fragments_merged = 0;
        let mut fragments_skipped = 0;

        for path in self.store.list_fragments()? {
            match read_fragment(&path) {
                Ok(test_case) => {
                    report.test_suite.add_test_case(test_case);
                    fragments_merged += 1;
                }
                Err(error) => {
                    warn!("skipping fragment: {}", DisplayErrorChain::new(&error));
                    fragments_skipped += 1;
                }
            }
        }

        self.write_report(&report)?;
        Ok(MergeSummary {
            report_path: self.report_path.clone(),
            counts: report.test_suite.counts(),
            fragments_merged,
            fragments_skipped,
        })
    }

    fn fresh_report(&self) -> Report {
        let metadata = self.metadata.collect();
        let mut test_suite = TestSuite::new(self.suite_name.as_str());
        test_suite
            .set_timestamp(Utc::now().naive_utc())
            .set_hostname(metadata.host.hostname.as_str())
            .add_properties(metadata.properties());
        Report::new(test_suite)
    }

    fn read_report(&self) -> Result<Option<Report>, ReportParseError> {
        let xml = match fs::read_to_string(&self.report_path) {
            Ok(xml) => xml,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(ReportParseError::Read {
                    path: self.report_path.clone(),
                    error,
                });
            }
        };
        Report::deserialize_str(&xml)
            .map(Some)
            .map_err(|error| ReportParseError::Deserialize {
                path: self.report_path.clone(),
                error,
            })
    }

    // The lock sentinel lives next to the report, so this must run before the lock is taken.
    fn ensure_report_dir(&self) -> Result<(), AccumulateError> {
        if let Some(dir) = self.report_path.parent().filter(|dir| !dir.as_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|error| AccumulateError::ReportDirCreate {
                dir: dir.to_owned(),
                error,
            })?;
        }
        Ok(())
    }

    fn write_report(&self, report: &Report) -> Result<(), AccumulateError> {
        AtomicFile::new(&self.report_path, OverwriteBehavior::AllowOverwrite)
            .write(|file| report.serialize(file))
            .map_err(|error| match error {
                atomicwrites::Error::Internal(error) => AccumulateError::Write {
                    path: self.report_path.clone(),
                    error,
                },
                atomicwrites::Error::User(error) => AccumulateError::Serialize {
                    path: self.report_path.clone(),
                    error,
                },
            })
    }
}
