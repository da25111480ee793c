// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signal watcher is process-wide state, and the default disposition of SIGTERM kills the
//! process. These tests re-execute the test binary and terminate the child.

use crate::fixtures::*;
use camino::Utf8PathBuf;
use color_eyre::eyre::{Result, bail, ensure};
use incremental_junit::{
    fragment::FragmentStore,
    session::{ProcessRole, ReportSessionBuilder, RunTopology},
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use signal_hook::consts::SIGTERM;
use std::{os::unix::process::ExitStatusExt, process::Command, time::Duration};

static CHILD_REPORT_ENV: &str = "INCREMENTAL_JUNIT_TEST_SIGNAL_REPORT";

static EVENTS: &str = indoc! {r#"
    {"event": "report", "node_id": "tests/test_math.py::test_add", "phase": "call", "outcome": "passed", "duration": 0.125}
    {"event": "teardown", "node_id": "tests/test_math.py::test_add", "name": "test_add", "file": "tests/test_math.py", "line": 4}
    {"event": "report", "node_id": "tests/test_math.py::test_sub", "phase": "call", "outcome": "failed", "duration": 0.04, "failure": "assert -1 == 1"}
    {"event": "teardown", "node_id": "tests/test_math.py::test_sub", "name": "test_sub", "file": "tests/test_math.py", "line": 8}
"#};

#[test]
fn terminated_primary_merges_before_exiting() -> Result<()> {
    if let Ok(report_path) = std::env::var(CHILD_REPORT_ENV) {
        return run_terminated_primary(report_path.into());
    }

    let dir = camino_tempfile::tempdir()?;
    let report_path = dir.path().join("junit.xml");

    let output = Command::new(std::env::current_exe()?)
        .args([
            "signals::terminated_primary_merges_before_exiting",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(CHILD_REPORT_ENV, &report_path)
        .output()?;
    assert_eq!(
        output.status.signal(),
        Some(SIGTERM),
        "child exits through SIGTERM's default disposition, stderr:\n{}",
        String::from_utf8_lossy(&output.stderr),
    );

    let report = read_report(&report_path)?;
    let names: Vec<_> = report
        .test_suite
        .test_cases
        .iter()
        .map(|test_case| test_case.name.as_str())
        .collect();
    assert_eq!(names, ["test_add", "test_sub"]);
    assert_eq!(report.test_suite.counts().failures, 1);

    let store = FragmentStore::for_report(&report_path, None);
    ensure!(!store.dir().exists(), "fragment store removed by the merge");
    Ok(())
}

// Runs in the child. Only returns on failure: success means being killed by SIGTERM.
fn run_terminated_primary(report_path: Utf8PathBuf) -> Result<()> {
    let mut builder = ReportSessionBuilder::new(report_path);
    builder
        .role(ProcessRole::Primary)
        .topology(RunTopology::Distributed)
        .host_identity(host());
    let mut session = builder.build();
    session.session_start()?;
    feed(&mut session, EVENTS)?;

    signal_hook::low_level::raise(SIGTERM)?;
    std::thread::sleep(Duration::from_secs(30));
    bail!("still running 30 seconds after SIGTERM");
}
