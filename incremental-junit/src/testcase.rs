// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning host events into report test cases.

use crate::{
    enrichment::{CompletedTest, EnrichmentRegistry},
    events::{FailureDetail, Outcome, TestPhase},
    traceback::TracebackCleaner,
    tracker::FailureAnnotator,
};
use junit_report::{NonSuccessKind, TestCase, TestCaseStatus};
use std::sync::Arc;

/// The default `type` attribute of `skipped` elements.
pub static DEFAULT_SKIP_TYPE: &str = "pytest.skip";

/// Builds [`TestCase`]s from completed tests.
#[derive(Debug)]
pub struct TestCaseBuilder {
    cleaner: TracebackCleaner,
    skip_type: String,
    enrichment: Arc<EnrichmentRegistry>,
    annotator: Option<FailureAnnotator>,
}

impl Default for TestCaseBuilder {
    fn default() -> Self {
        Self::new(TracebackCleaner::default(), Arc::default())
    }
}

impl TestCaseBuilder {
    /// Creates a new builder.
    pub fn new(cleaner: TracebackCleaner, enrichment: Arc<EnrichmentRegistry>) -> Self {
        Self {
            cleaner,
            skip_type: DEFAULT_SKIP_TYPE.to_owned(),
            enrichment,
            annotator: None,
        }
    }

    /// Sets the `type` attribute written on `skipped` elements.
    pub fn set_skip_type(&mut self, skip_type: impl Into<String>) -> &mut Self {
        self.skip_type = skip_type.into();
        self
    }

    /// Enables issue-tracker annotation of failure messages.
    pub fn set_annotator(&mut self, annotator: FailureAnnotator) -> &mut Self {
        self.annotator = Some(annotator);
        self
    }

    /// Returns the failure annotator, if annotation is enabled.
    pub fn annotator(&self) -> Option<&FailureAnnotator> {
        self.annotator.as_ref()
    }

    /// Builds the test case for a completed test.
    pub fn build(&self, test: &CompletedTest<'_>) -> TestCase {
        let CompletedTest { report, teardown } = *test;
        let classname = teardown.classname();

        let status = match report.outcome {
            Outcome::Failed => {
                let kind = match report.phase {
                    TestPhase::Setup => NonSuccessKind::Error,
                    TestPhase::Call | TestPhase::Teardown => NonSuccessKind::Failure,
                };
                let plain = FailureDetail::Plain(String::new());
                let failure = report.failure.as_ref().unwrap_or(&plain);

                let message = match &self.annotator {
                    Some(annotator) => {
                        annotator.annotate(&classname, &teardown.name, failure.message())
                    }
                    None => failure.message().to_owned(),
                };

                let mut status = TestCaseStatus::non_success(kind);
                status
                    .set_message(message)
                    .set_description(self.cleaner.clean(failure));
                status
            }
            Outcome::Skipped => {
                let mut status = TestCaseStatus::skipped();
                status.set_type(self.skip_type.as_str());
                if let Some(skip) = &report.skip {
                    status
                        .set_message(skip.reason.as_str())
                        .set_description(format!("{}:{}: {}", skip.file, skip.line, skip.reason));
                }
                status
            }
            // Reruns are filtered out before a report is kept.
            Outcome::Passed | Outcome::Rerun => TestCaseStatus::success(),
        };

        let mut test_case = TestCase::new(classname, teardown.name.as_str(), status);
        test_case
            .set_file(teardown.file.as_str())
            .set_time(report.duration)
            .add_properties(self.enrichment.test_case_properties(test));
        if let Some(line) = teardown.line {
            test_case.set_line(line);
        }
        test_case
    }
}
