// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, ensure, eyre};
use incremental_junit::{
    accumulator::{Accumulator, MergeOutcome},
    enrichment::EnrichmentRegistry,
    fragment::{FragmentStore, FragmentWriter},
    lock::{ReportLock, SentinelLock, sentinel_path},
    metadata::MetadataSource,
};
use junit_report::{TestCase, TestCaseStatus};
use pretty_assertions::assert_eq;
use std::{sync::Arc, thread, time::Duration};

// Each accumulator stands in for a separate process: they share nothing but the file system.
fn accumulator(report_path: &Utf8Path) -> Accumulator {
    let lock = SentinelLock::for_report(report_path).with_poll_interval(Duration::from_millis(1));
    let mut accumulator = Accumulator::with_lock(report_path, lock);
    accumulator.set_metadata(MetadataSource::new(host(), Arc::new(EnrichmentRegistry::new())));
    accumulator
}

fn test_case(name: String) -> TestCase {
    let mut test_case = TestCase::new("test_concurrency", name, TestCaseStatus::success());
    test_case.set_time(Duration::from_millis(10));
    test_case
}

#[test]
fn concurrent_appends_are_serialized() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let report_path = dir.path().join("junit.xml");
    accumulator(&report_path).initialize()?;

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let report_path = report_path.clone();
            thread::spawn(move || {
                let accumulator = accumulator(&report_path);
                for n in 0..5 {
                    accumulator.append(test_case(format!("test_{writer}_{n}")))?;
                }
                Ok::<_, color_eyre::Report>(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().map_err(|_| eyre!("writer panicked"))??;
    }

    let report = read_report(&report_path)?;
    let mut names: Vec<_> = report
        .test_suite
        .test_cases
        .iter()
        .map(|tc| tc.name.clone())
        .collect();
    names.sort();
    let mut expected: Vec<_> = (0..4)
        .flat_map(|writer| (0..5).map(move |n| format!("test_{writer}_{n}")))
        .collect();
    expected.sort();
    assert_eq!(names, expected);

    let xml = std::fs::read_to_string(&report_path)?;
    ensure!(xml.contains(r#"tests="20""#), "counts recomputed:\n{xml}");
    ensure!(!sentinel_path(&report_path).exists(), "lock released");
    Ok(())
}

#[test]
fn append_waits_for_lock_holder() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let report_path = dir.path().join("junit.xml");

    let other_process = SentinelLock::for_report(&report_path);
    let guard = other_process.acquire()?;

    let writer = {
        let report_path = report_path.clone();
        thread::spawn(move || accumulator(&report_path).append(test_case("test_waiting".to_owned())))
    };
    thread::sleep(Duration::from_millis(100));
    ensure!(!report_path.exists(), "append must wait for the lock");

    drop(guard);
    let counts = writer.join().map_err(|_| eyre!("writer panicked"))??;
    assert_eq!(counts.tests, 1);
    Ok(())
}

#[test]
fn lock_timeout_leaves_report_untouched() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let report_path = dir.path().join("junit.xml");
    accumulator(&report_path).append(test_case("test_before".to_owned()))?;
    let before = std::fs::read_to_string(&report_path)?;

    let _guard = SentinelLock::for_report(&report_path).acquire()?;
    let lock = SentinelLock::for_report(&report_path)
        .with_timeout(Duration::from_millis(100))
        .with_poll_interval(Duration::from_millis(10));
    let error = Accumulator::with_lock(&report_path, lock)
        .append(test_case("test_after".to_owned()))
        .expect_err("lock is held");
    ensure!(error.is_lock_timeout(), "unexpected error: {error}");

    assert_eq!(std::fs::read_to_string(&report_path)?, before);
    Ok(())
}

#[test]
fn concurrent_merges_run_once() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let report_path = dir.path().join("junit.xml");
    let store = FragmentStore::for_report(&report_path, None);
    store.reset()?;

    for tag in ["gw0", "gw1"] {
        let writer = FragmentWriter::new(store.clone(), tag);
        for n in 0..3 {
            let node_id = format!("tests/test_concurrency.py::test_{tag}_{n}");
            writer.record(&node_id, &test_case(format!("test_{tag}_{n}")))?;
        }
    }

    // The session and the signal watcher share one accumulator.
    let shared = Arc::new(accumulator(&report_path));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || shared.merge())
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.join().map_err(|_| eyre!("merge panicked"))??);
    }

    let merged: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            MergeOutcome::Merged(summary) => Some(summary.fragments_merged),
            MergeOutcome::AlreadyMerged => None,
        })
        .collect();
    assert_eq!(merged, [6]);
    assert_eq!(read_report(&report_path)?.test_suite.test_cases.len(), 6);
    Ok(())
}
