// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, bail, ensure};
use incremental_junit::{
    accumulator::{MergeOutcome, Strategy},
    config::{IncrementalJunitConfig, StrategySetting},
    session::{ProcessRole, ReportSessionBuilder, RunTopology, SessionState},
    signal::SignalHandlerKind,
    tracker::{KnownIssue, failure_id, search_query},
};
use indoc::{formatdoc, indoc};
use junit_report::{NonSuccessKind, TestCaseStatus};
use pretty_assertions::assert_eq;
use std::{sync::atomic::Ordering, time::Duration};

fn session_builder(dir: &Utf8TempDir, role: ProcessRole, topology: RunTopology) -> ReportSessionBuilder {
    let mut builder = ReportSessionBuilder::new(dir.path().join("junit.xml"));
    builder
        .role(role)
        .topology(topology)
        .host_identity(host())
        .signal_handler(SignalHandlerKind::Noop);
    builder
}

fn worker(tag: &str) -> ProcessRole {
    ProcessRole::Worker {
        tag: tag.to_owned(),
    }
}

static PRIMARY_EVENTS: &str = indoc! {r#"
    {"event": "report", "node_id": "tests/test_main.py::test_cli", "phase": "call", "outcome": "passed", "duration": 0.01}
    {"event": "teardown", "node_id": "tests/test_main.py::test_cli", "name": "test_cli", "file": "tests/test_main.py", "line": 2}
"#};

static GW0_EVENTS: &str = indoc! {r#"
    {"event": "report", "node_id": "tests/test_math.py::test_add", "phase": "setup", "outcome": "passed", "duration": 0.001}
    {"event": "report", "node_id": "tests/test_math.py::test_add", "phase": "call", "outcome": "passed", "duration": 0.125}
    {"event": "report", "node_id": "tests/test_math.py::test_add", "phase": "teardown", "outcome": "passed", "duration": 0.002}
    {"event": "teardown", "node_id": "tests/test_math.py::test_add", "name": "test_add", "file": "tests/test_math.py", "line": 4}
    {"event": "report", "node_id": "tests/test_math.py::test_div[zero]", "phase": "call", "outcome": "failed", "duration": 0.04, "failure": {"crash_message": "ZeroDivisionError: division by zero", "entries": [{"lines": ["    def test_div(d):", ">       1 / d", "E       ZeroDivisionError: division by zero"]}, {"lines": ["/usr/lib/python3/site-packages/_pytest/python.py:159: in pytest_pyfunc_call"]}]}}
    {"event": "teardown", "node_id": "tests/test_math.py::test_div[zero]", "name": "test_div[zero]", "file": "tests/test_math.py", "line": 9}
"#};

static GW1_EVENTS: &str = indoc! {r#"
    {"event": "report", "node_id": "tests/test_io.py::TestFiles::test_symlink", "phase": "setup", "outcome": "skipped", "duration": 0.0, "skip": {"file": "tests/test_io.py", "line": 12, "reason": "no symlinks on this platform"}}
    {"event": "teardown", "node_id": "tests/test_io.py::TestFiles::test_symlink", "name": "test_symlink", "file": "tests/test_io.py", "line": 11}
"#};

#[test]
fn distributed_run_from_host_events() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;

    let mut primary = session_builder(&dir, ProcessRole::Primary, RunTopology::Distributed);
    primary
        .tracker(credentials(), 3, Duration::ZERO)
        .enrichment_mut()
        .register(BuildInfo { build: "1234" })
        .register(Broken);
    let mut primary = primary.build();
    assert_eq!(primary.strategy(), Strategy::Collect);
    primary.session_start()?;
    feed(&mut primary, PRIMARY_EVENTS)?;

    for (tag, events) in [("gw0", GW0_EVENTS), ("gw1", GW1_EVENTS)] {
        let mut builder = session_builder(&dir, worker(tag), RunTopology::Distributed);
        builder
            .tracker(credentials(), 3, Duration::ZERO)
            .enrichment_mut()
            .register(BuildInfo { build: "1234" });
        let mut session = builder.build();
        session.session_start()?;
        feed(&mut session, events)?;
        ensure!(session.session_finish()?.is_none(), "workers never merge");
    }
    ensure!(!primary.report_path().exists(), "report only written by the merge");

    let Some(MergeOutcome::Merged(summary)) = primary.session_finish()? else {
        bail!("primary should merge");
    };
    assert_eq!(summary.fragments_merged, 4);
    assert_eq!(summary.fragments_skipped, 0);
    assert_eq!(primary.state(), SessionState::Done);
    ensure!(
        !primary.accumulator().store().dir().exists(),
        "fragment store removed after merge"
    );

    let xml = std::fs::read_to_string(primary.report_path())?;
    ensure!(
        xml.contains(r#"tests="4" failures="1" errors="0" skipped="1" time="0.175""#),
        "unexpected counts in:\n{xml}"
    );

    let report = read_report(primary.report_path())?;
    let suite = &report.test_suite;
    assert_eq!(suite.hostname.as_deref(), Some("ci-box-3"));
    let properties: Vec<_> = suite
        .properties
        .iter()
        .map(|p| (p.name.as_str(), p.value.as_str()))
        .collect();
    assert_eq!(
        properties,
        [("ip_address", "10.1.2.3"), ("hostname", "ci-box-3"), ("build", "1234")]
    );

    // Fragments are merged in file name order.
    let names: Vec<_> = suite.test_cases.iter().map(|tc| tc.name.as_str()).collect();
    assert_eq!(names, ["test_symlink", "test_cli", "test_add", "test_div[zero]"]);

    let symlink = &suite.test_cases[0];
    assert_eq!(symlink.classname, "tests.test_io.py.TestFiles");
    let TestCaseStatus::Skipped { ty, description, .. } = &symlink.status else {
        bail!("test_symlink should be skipped");
    };
    assert_eq!(ty.as_deref(), Some("pytest.skip"));
    assert_eq!(
        description.as_deref(),
        Some("tests/test_io.py:12: no symlinks on this platform")
    );

    let div = &suite.test_cases[3];
    assert_eq!(div.classname, "test_math");
    assert_eq!(
        div.properties
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect::<Vec<_>>(),
        [("node_id", "tests/test_math.py::test_div[zero]")]
    );
    let TestCaseStatus::NonSuccess {
        kind: NonSuccessKind::Failure,
        message,
        description,
        ..
    } = &div.status
    else {
        bail!("test_div[zero] should fail");
    };
    // Workers can't reach the tracker, so the failure id is attached for later triage.
    let id = failure_id("test_math", "test_div[zero]", "ZeroDivisionError: division by zero");
    assert_eq!(
        message.as_deref(),
        Some(format!("ZeroDivisionError: division by zero@@testid#{id}").as_str())
    );
    let description = description.as_deref().unwrap_or_default();
    ensure!(description.contains(">       1 / d"), "user frames kept: {description}");
    ensure!(!description.contains("_pytest"), "internal frames dropped: {description}");

    Ok(())
}

#[test]
fn connected_tracker_annotates_known_failures() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;

    let known_id = failure_id("test_math", "test_sub[neg]", "assert -1 == 1");
    let tracker = FixedTracker::new([(
        search_query(&known_id),
        KnownIssue {
            permalink: "https://tracker.example/browse/QA-7".to_owned(),
            issue_type: "Bug".to_owned(),
            summary: "Subtraction is off by two".to_owned(),
            status: "Resolved".to_owned(),
        },
    )]);
    let connector = FlakyConnector::new(tracker.clone(), 1);
    let attempts = connector.attempts();

    let mut builder = session_builder(&dir, ProcessRole::Primary, RunTopology::Single);
    builder
        .tracker(credentials(), 3, Duration::ZERO)
        .tracker_connector(connector);
    let mut session = builder.build();
    session.session_start()?;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let mut events = String::new();
    for (name, message) in [
        ("test_sub[neg]", "assert -1 == 1"),
        ("test_sub[pos]", "assert -1 == 1"),
        ("test_mul", "assert 6 == 8"),
    ] {
        events.push_str(&formatdoc! {r#"
            {{"event": "report", "node_id": "tests/test_math.py::{name}", "phase": "call", "outcome": "failed", "duration": 0.5, "failure": "{message}"}}
            {{"event": "teardown", "node_id": "tests/test_math.py::{name}", "name": "{name}", "file": "tests/test_math.py"}}
        "#});
    }
    feed(&mut session, &events)?;
    assert_eq!(session.session_finish()?, None);
    assert_eq!(tracker.searches(), 3);

    let report = read_report(session.report_path())?;
    let messages: Vec<_> = report
        .test_suite
        .test_cases
        .iter()
        .map(|tc| tc.status.message().unwrap_or_default().to_owned())
        .collect();
    let unknown_id = failure_id("test_math", "test_mul", "assert 6 == 8");
    let annotation = "Resolved in branch https://tracker.example/browse/QA-7 Bug [Subtraction is off by two]";
    assert_eq!(
        messages,
        [
            annotation.to_owned(),
            annotation.to_owned(),
            format!("assert 6 == 8@@testid#{unknown_id}"),
        ]
    );
    Ok(())
}

#[test]
fn unreachable_tracker_disables_annotation() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let connector = FlakyConnector::new(FixedTracker::default(), u32::MAX);
    let attempts = connector.attempts();

    let mut builder = session_builder(&dir, ProcessRole::Primary, RunTopology::Single);
    builder
        .tracker(credentials(), 2, Duration::ZERO)
        .tracker_connector(connector);
    let mut session = builder.build();
    session.session_start()?;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    feed(
        &mut session,
        indoc! {r#"
            {"event": "report", "node_id": "tests/test_math.py::test_mul", "phase": "call", "outcome": "failed", "failure": "assert 6 == 8"}
            {"event": "teardown", "node_id": "tests/test_math.py::test_mul", "name": "test_mul", "file": "tests/test_math.py"}
        "#},
    )?;
    session.session_finish()?;

    let report = read_report(session.report_path())?;
    assert_eq!(
        report.test_suite.test_cases[0].status.message(),
        Some("assert 6 == 8")
    );
    Ok(())
}

#[test]
fn interrupted_run_is_merged_once() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let mut primary = session_builder(&dir, ProcessRole::Primary, RunTopology::Distributed).build();
    primary.session_start()?;

    let mut gw0 = session_builder(&dir, worker("gw0"), RunTopology::Distributed).build();
    gw0.session_start()?;
    feed(&mut gw0, GW0_EVENTS)?;

    // What the signal watcher does on SIGINT.
    let MergeOutcome::Merged(summary) = primary.accumulator().merge()? else {
        bail!("first merge should run");
    };
    assert_eq!(summary.counts.tests, 2);

    // Results recorded after the merge don't make it into the report.
    feed(&mut gw0, GW1_EVENTS)?;
    assert_eq!(primary.session_finish()?, Some(MergeOutcome::AlreadyMerged));
    assert_eq!(read_report(primary.report_path())?.test_suite.test_cases.len(), 2);
    Ok(())
}

#[test]
fn host_supplied_properties() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let mut builder = session_builder(&dir, ProcessRole::Primary, RunTopology::Single);
    builder
        .session_property(("ci_job", "nightly"))
        .enrichment_mut()
        .register(BuildInfo { build: "1234" });
    let mut session = builder.build();
    session.session_start()?;
    feed(
        &mut session,
        indoc! {r#"
            {"event": "report", "node_id": "tests/test_math.py::test_add", "phase": "call", "outcome": "passed", "duration": 0.01}
            {"event": "teardown", "node_id": "tests/test_math.py::test_add", "name": "test_add", "file": "tests/test_math.py", "properties": [{"name": "docstring", "value": "Adds two numbers."}, {"name": "attachment", "value": "logs/test_add.txt"}]}
        "#},
    )?;
    session.session_finish()?;

    let report = read_report(session.report_path())?;
    let suite_properties: Vec<_> = report
        .test_suite
        .properties
        .iter()
        .map(|p| (p.name.as_str(), p.value.as_str()))
        .collect();
    assert_eq!(
        suite_properties,
        [
            ("ip_address", "10.1.2.3"),
            ("hostname", "ci-box-3"),
            ("ci_job", "nightly"),
            ("build", "1234"),
        ]
    );

    let test_properties: Vec<_> = report.test_suite.test_cases[0]
        .properties
        .iter()
        .map(|p| (p.name.as_str(), p.value.as_str()))
        .collect();
    assert_eq!(
        test_properties,
        [
            ("docstring", "Adds two numbers."),
            ("attachment", "logs/test_add.txt"),
            ("node_id", "tests/test_math.py::test_add"),
        ]
    );
    Ok(())
}

#[test]
fn session_from_config() -> Result<()> {
    let dir = camino_tempfile::tempdir()?;
    let report_path = dir.path().join("reports").join("junit.xml");
    let config_path = dir.path().join("incremental-junit.toml");
    std::fs::write(
        &config_path,
        formatdoc! {r#"
            [report]
            path = '{report_path}'
            suite-name = "nightly"
            strategy = "collect"
            lock-timeout = "5s"
            worker-env-var = "INCREMENTAL_JUNIT_TEST_NEVER_SET"
        "#},
    )?;
    let config = IncrementalJunitConfig::from_sources(Some(&config_path))?;
    assert_eq!(config.report.strategy, StrategySetting::Collect);

    let mut builder =
        ReportSessionBuilder::from_config(&config).expect("report path is configured");
    builder
        .topology(RunTopology::Single)
        .host_identity(host())
        .signal_handler(SignalHandlerKind::Noop);
    let mut session = builder.build();
    assert_eq!(session.role(), &ProcessRole::Primary);
    assert_eq!(session.strategy(), Strategy::Collect);

    session.session_start()?;
    feed(&mut session, PRIMARY_EVENTS)?;
    session.session_finish()?;

    let report = read_report(&report_path)?;
    assert_eq!(report.test_suite.name, "nightly");
    assert_eq!(report.test_suite.test_cases.len(), 1);

    let disabled = IncrementalJunitConfig::from_sources(None)?;
    ensure!(
        ReportSessionBuilder::from_config(&disabled).is_none(),
        "no report path disables reporting"
    );
    Ok(())
}
