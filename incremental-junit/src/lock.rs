// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-process mutual exclusion for the report file.
//!
//! The lock is a sentinel file created with create-exclusive semantics next to the report. It is
//! advisory: only processes that go through a [`ReportLock`] honor it.

use crate::errors::LockError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::OpenOptions,
    io,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// The default time to wait for the lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// The default interval between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A lock serializing access to a report document across processes.
pub trait ReportLock: Send + Sync {
    /// The guard returned by [`acquire`](Self::acquire). The lock is released when it is dropped.
    type Guard;

    /// Blocks until the lock is acquired, or fails once the lock's timeout elapses.
    fn acquire(&self) -> Result<Self::Guard, LockError>;
}

/// A [`ReportLock`] backed by a sentinel file.
#[derive(Clone, Debug)]
pub struct SentinelLock {
    path: Utf8PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl SentinelLock {
    /// Creates a lock for the given report, using `<report>.lock` as the sentinel.
    pub fn for_report(report_path: &Utf8Path) -> Self {
        Self::new(sentinel_path(report_path))
    }

    /// Creates a lock with an explicit sentinel path and the default timings.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the acquisition timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the interval between acquisition attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns the sentinel path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the acquisition timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ReportLock for SentinelLock {
    type Guard = SentinelGuard;

    fn acquire(&self) -> Result<SentinelGuard, LockError> {
        let start = Instant::now();
        loop {
            let result = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path);

            match result {
                Ok(_) => {
                    debug!(path = %self.path, elapsed = ?start.elapsed(), "acquired report lock");
                    return Ok(SentinelGuard {
                        path: self.path.clone(),
                    });
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                    // Held by another writer.
                    if start.elapsed() >= self.timeout {
                        return Err(LockError::Timeout {
                            path: self.path.clone(),
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(error) => {
                    return Err(LockError::Create {
                        path: self.path.clone(),
                        error,
                    });
                }
            }
        }
    }
}

/// Holds a [`SentinelLock`]. Removes the sentinel on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SentinelGuard {
    path: Utf8PathBuf,
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path, %error, "failed to remove report lock sentinel");
        }
    }
}

/// Returns the sentinel path for a report: the report path with `.lock` appended.
pub fn sentinel_path(report_path: &Utf8Path) -> Utf8PathBuf {
    let mut path = report_path.as_str().to_owned();
    path.push_str(".lock");
    path.into()
}
