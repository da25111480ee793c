// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-test-case fragments.
//!
//! Every completed test case is written to its own file in a [`FragmentStore`] as soon as it is
//! known, so that results survive a crash of the process that produced them. The terminal merge
//! later folds the fragments into the report.

use crate::errors::{FragmentParseError, FragmentStoreError, FragmentWriteError};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use junit_report::TestCase;
use std::{fs, io};
use tracing::debug;

/// The worker tag used by a process that is not a worker.
pub const PRIMARY_WORKER_TAG: &str = "master";

static FRAGMENT_EXTENSION: &str = "xml";

/// The working directory holding the fragments for one report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentStore {
    dir: Utf8PathBuf,
}

impl FragmentStore {
    /// Returns the fragment store for the given report.
    ///
    /// The store lives in `work_dir` (the report's parent directory if not given), in a hidden
    /// directory named after the report file: `.<file name>_temp`.
    pub fn for_report(report_path: &Utf8Path, work_dir: Option<&Utf8Path>) -> Self {
        let work_dir = work_dir
            .or_else(|| report_path.parent())
            .unwrap_or_else(|| Utf8Path::new(""));
        let file_name = report_path.file_name().unwrap_or("report.xml");
        Self {
            dir: work_dir.join(format!(".{file_name}_temp")),
        }
    }

    /// Creates a store rooted at an explicit directory.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory of this store.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Purges any stale contents and recreates the directory.
    pub fn reset(&self) -> Result<(), FragmentStoreError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir, "purged stale fragment store"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(FragmentStoreError::Purge {
                    dir: self.dir.clone(),
                    error,
                });
            }
        }
        self.ensure()
    }

    /// Creates the directory if it doesn't exist.
    pub fn ensure(&self) -> Result<(), FragmentStoreError> {
        fs::create_dir_all(&self.dir).map_err(|error| FragmentStoreError::Create {
            dir: self.dir.clone(),
            error,
        })
    }

    /// Returns the path of the fragment for the given test and worker.
    pub fn fragment_path(&self, node_id: &str, worker_tag: &str) -> Utf8PathBuf {
        self.dir.join(format!(
            "{}_{}.{FRAGMENT_EXTENSION}",
            sanitize_node_id(node_id),
            worker_tag,
        ))
    }

    /// Lists fragment files in lexicographic file name order.
    ///
    /// A store that doesn't exist has no fragments.
    pub fn list_fragments(&self) -> Result<Vec<Utf8PathBuf>, FragmentStoreError> {
        let list_err = |error| FragmentStoreError::List {
            dir: self.dir.clone(),
            error,
        };

        let entries = match self.dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(list_err(error)),
        };

        let mut fragments = Vec::new();
        for entry in entries {
            let entry = entry.map_err(list_err)?;
            let path = entry.path();
            // Skips in-progress temporary files from atomic writes.
            let is_file = entry.file_type().is_ok_and(|ty| ty.is_file());
            if is_file && path.extension() == Some(FRAGMENT_EXTENSION) {
                fragments.push(path.to_owned());
            }
        }
        fragments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(fragments)
    }

    /// Removes the store and everything in it. A store that's already gone is not an error.
    pub fn remove(&self) -> Result<(), FragmentStoreError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(FragmentStoreError::Remove {
                dir: self.dir.clone(),
                error,
            }),
        }
    }
}

/// Writes fragments for one process into a [`FragmentStore`].
#[derive(Clone, Debug)]
pub struct FragmentWriter {
    store: FragmentStore,
    worker_tag: String,
}

impl FragmentWriter {
    /// Creates a new writer. `worker_tag` disambiguates fragments from different workers.
    pub fn new(store: FragmentStore, worker_tag: impl Into<String>) -> Self {
        Self {
            store,
            worker_tag: worker_tag.into(),
        }
    }

    /// Returns the store this writer writes to.
    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// Returns the worker tag.
    pub fn worker_tag(&self) -> &str {
        &self.worker_tag
    }

    /// Persists a test case as a fragment, returning the path written.
    ///
    /// A fragment for the same test and worker is replaced.
    pub fn record(
        &self,
        node_id: &str,
        test_case: &TestCase,
    ) -> Result<Utf8PathBuf, FragmentWriteError> {
        self.store.ensure()?;
        let path = self.store.fragment_path(node_id, &self.worker_tag);

        AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite)
            .write(|file| test_case.serialize_fragment(file))
            .map_err(|error| match error {
                atomicwrites::Error::Internal(error) => FragmentWriteError::Write {
                    path: path.clone(),
                    error,
                },
                atomicwrites::Error::User(error) => FragmentWriteError::Serialize {
                    path: path.clone(),
                    error,
                },
            })?;

        debug!(%path, "wrote fragment");
        Ok(path)
    }
}

/// Reads a fragment file back into a test case.
pub fn read_fragment(path: &Utf8Path) -> Result<TestCase, FragmentParseError> {
    let xml = fs::read_to_string(path).map_err(|error| FragmentParseError::Read {
        path: path.to_owned(),
        error,
    })?;
    TestCase::deserialize_fragment_str(&xml).map_err(|error| FragmentParseError::Deserialize {
        path: path.to_owned(),
        error,
    })
}

/// Replaces every character outside `[A-Za-z0-9_.\[\]-]` with `_`.
pub fn sanitize_node_id(node_id: &str) -> String {
    node_id
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '.' | '[' | ']' | '-' => c,
            _ => '_',
        })
        .collect()
}
