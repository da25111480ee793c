// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::NaiveDate;
use indoc::indoc;
use junit_report::{NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::time::Duration;

#[test]
fn basic_report_fixture() {
    let xml = basic_report().to_string().expect("serializing basic_report succeeds");
    assert_eq!(
        xml,
        indoc! {r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <testsuites>
            	<testsuite name="my-test-run" timestamp="2024-03-01T12:30:45.123" hostname="ci-box" tests="4" failures="1" errors="1" skipped="1" time="0.166">
            		<properties>
            			<property name="ip_address" value="10.0.0.7"/>
            			<property name="hostname" value="ci-box"/>
            		</properties>
            		<testcase classname="tests.test_math" name="test_a" file="tests/test_math.py" line="3" time="0.125"/>
            		<testcase classname="tests.test_math" name="test_b" file="tests/test_math.py" line="7" time="0.040">
            			<failure message="AssertionError: x != y">Traceback (most recent call last):
              File "tests/test_math.py", line 8, in test_b
            AssertionError: x != y</failure>
            			<properties>
            				<property name="docstring" value="Adds two numbers."/>
            			</properties>
            		</testcase>
            		<testcase classname="tests.test_math" name="test_c" file="tests/test_math.py" line="11" time="0.001">
            			<error message="fixture setup failed">fixture setup failed</error>
            		</testcase>
            		<testcase classname="tests.test_math" name="test_d" file="tests/test_math.py" line="15" time="0.000">
            			<skipped type="skip" message="not on this platform">tests/test_math.py:15: not on this platform</skipped>
            		</testcase>
            	</testsuite>
            </testsuites>
        "#}
    );
}

#[test]
fn basic_report_reads_back_unchanged() {
    let report = basic_report();
    let xml = report.to_string().expect("serializing succeeds");
    let read_back = Report::deserialize_str(&xml).expect("reading back succeeds");
    assert_eq!(read_back, report);
}

#[test]
fn fragment_reads_back_unchanged() {
    let report = basic_report();
    for test_case in &report.test_suite.test_cases {
        let xml = test_case
            .to_fragment_string()
            .expect("serializing fragment succeeds");
        let read_back = TestCase::deserialize_fragment_str(&xml).expect("reading back succeeds");
        assert_eq!(&read_back, test_case);
    }
}

#[test]
fn empty_descriptions_read_back_unchanged() {
    let mut failure = TestCaseStatus::non_success(NonSuccessKind::Failure);
    failure.set_message("").set_description("");
    let mut skipped = TestCaseStatus::skipped();
    skipped.set_description("");

    for (name, status) in [("test_failed", failure), ("test_skipped", skipped)] {
        let test_case = TestCase::new("tests.test_math", name, status);
        let xml = test_case
            .to_fragment_string()
            .expect("serializing fragment succeeds");
        let read_back = TestCase::deserialize_fragment_str(&xml).expect("reading back succeeds");
        assert_eq!(read_back, test_case, "{xml}");
    }

    // A status without a body has no description.
    let mut bare = TestCaseStatus::non_success(NonSuccessKind::Error);
    bare.set_message("setup failed");
    let test_case = TestCase::new("tests.test_math", "test_error", bare);
    let xml = test_case
        .to_fragment_string()
        .expect("serializing fragment succeeds");
    let read_back = TestCase::deserialize_fragment_str(&xml).expect("reading back succeeds");
    assert_eq!(read_back, test_case, "{xml}");
}

fn basic_report() -> Report {
    let mut test_suite = TestSuite::new("my-test-run");
    test_suite
        .set_timestamp(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_milli_opt(12, 30, 45, 123))
                .expect("valid timestamp"),
        )
        .set_hostname("ci-box")
        .add_property(("ip_address", "10.0.0.7"))
        .add_property(("hostname", "ci-box"));

    let mut test_case = TestCase::new("tests.test_math", "test_a", TestCaseStatus::success());
    test_case
        .set_file("tests/test_math.py")
        .set_line(3)
        .set_time(Duration::from_millis(125));
    test_suite.add_test_case(test_case);

    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
    status.set_message("AssertionError: x != y").set_description(
        "Traceback (most recent call last):\n  File \"tests/test_math.py\", line 8, in test_b\nAssertionError: x != y",
    );
    let mut test_case = TestCase::new("tests.test_math", "test_b", status);
    test_case
        .set_file("tests/test_math.py")
        .set_line(7)
        .set_time(Duration::from_millis(40))
        .add_property(Property::new("docstring", "Adds two numbers."));
    test_suite.add_test_case(test_case);

    let mut status = TestCaseStatus::non_success(NonSuccessKind::Error);
    status
        .set_message("fixture setup failed")
        .set_description("fixture setup failed");
    let mut test_case = TestCase::new("tests.test_math", "test_c", status);
    test_case
        .set_file("tests/test_math.py")
        .set_line(11)
        .set_time(Duration::from_micros(1_200));
    test_suite.add_test_case(test_case);

    let mut status = TestCaseStatus::skipped();
    status
        .set_type("skip")
        .set_message("not on this platform")
        .set_description("tests/test_math.py:15: not on this platform");
    let mut test_case = TestCase::new("tests.test_math", "test_d", status);
    test_case.set_file("tests/test_math.py").set_line(15);
    test_suite.add_test_case(test_case);

    Report::new(test_suite)
}

fn status_strategy() -> impl Strategy<Value = TestCaseStatus> {
    prop_oneof![
        Just(TestCaseStatus::success()),
        Just(TestCaseStatus::non_success(NonSuccessKind::Failure)),
        Just(TestCaseStatus::non_success(NonSuccessKind::Error)),
        Just(TestCaseStatus::skipped()),
    ]
}

proptest! {
    // The counters written to disk always match the children, whatever the mix of outcomes.
    #[test]
    fn serialized_counters_match_children(
        cases in prop::collection::vec((status_strategy(), 0u64..5_000_000), 0..24)
    ) {
        let mut test_suite = TestSuite::new("run");
        let mut expected_millis = 0u128;
        for (index, (status, micros)) in cases.iter().enumerate() {
            let mut test_case = TestCase::new("m", format!("test_{index}"), status.clone());
            test_case.set_time(Duration::from_micros(*micros));
            expected_millis += test_case.time.as_millis();
            test_suite.add_test_case(test_case);
        }

        let xml = Report::new(test_suite).to_string().expect("serializing succeeds");
        let count = |ty: &str| cases.iter().filter(|(status, _)| match status {
            TestCaseStatus::Success => ty == "passed",
            TestCaseStatus::NonSuccess { kind: NonSuccessKind::Failure, .. } => ty == "failure",
            TestCaseStatus::NonSuccess { kind: NonSuccessKind::Error, .. } => ty == "error",
            TestCaseStatus::Skipped { .. } => ty == "skipped",
        }).count();

        let expected = format!(
            "tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{}.{:03}\"",
            cases.len(),
            count("failure"),
            count("error"),
            count("skipped"),
            expected_millis / 1000,
            expected_millis % 1000,
        );
        prop_assert!(xml.contains(&expected), "{} not found in {}", expected, xml);
        prop_assert_eq!(xml.matches("<testcase ").count(), cases.len());
    }
}
