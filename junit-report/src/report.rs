// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    deserialize::{deserialize_fragment, deserialize_report},
    errors::{DeserializeError, SerializeError},
    serialize::{serialize_fragment, serialize_report},
};
use chrono::NaiveDateTime;
use std::{io, time::Duration};

/// The format used for the `timestamp` attribute of a test suite: UTC wall-clock time with
/// millisecond precision and no zone suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// The root element of a report: a `testsuites` container holding exactly one suite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// The test suite for the run.
    pub test_suite: TestSuite,
}

impl Report {
    /// Creates a new `Report` wrapping the given suite.
    pub fn new(test_suite: TestSuite) -> Self {
        Self { test_suite }
    }

    /// Serializes this report to the given writer.
    ///
    /// The output is UTF-8 with an XML declaration, indented with tabs, and ends with a newline.
    pub fn serialize(&self, writer: impl io::Write) -> Result<(), SerializeError> {
        Ok(serialize_report(self, writer)?)
    }

    /// Serializes this report to a string.
    pub fn to_string(&self) -> Result<String, SerializeError> {
        let mut buf: Vec<u8> = vec![];
        self.serialize(&mut buf)?;
        String::from_utf8(buf).map_err(|utf8_err| {
            SerializeError::from(quick_xml::Error::NonDecodable(Some(utf8_err.utf8_error())))
        })
    }

    /// Reads a report back from a string.
    ///
    /// Summary counters in the document are ignored: they are derived from the test cases.
    pub fn deserialize_str(xml: &str) -> Result<Self, DeserializeError> {
        deserialize_report(xml)
    }
}

/// Represents the single test suite of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestSuite {
    /// The name of this test suite.
    pub name: String,

    /// The time at which the run started, in UTC.
    pub timestamp: Option<NaiveDateTime>,

    /// The host the run executed on.
    pub hostname: Option<String>,

    /// Session-level properties, e.g. the host address.
    pub properties: Vec<Property>,

    /// The test cases that form this suite, in insertion order.
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    /// Creates a new, empty `TestSuite`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: None,
            hostname: None,
            properties: vec![],
            test_cases: vec![],
        }
    }

    /// Sets the start timestamp.
    pub fn set_timestamp(&mut self, timestamp: NaiveDateTime) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the host name.
    pub fn set_hostname(&mut self, hostname: impl Into<String>) -> &mut Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Adds a property to this suite.
    pub fn add_property(&mut self, property: impl Into<Property>) -> &mut Self {
        self.properties.push(property.into());
        self
    }

    /// Adds several properties to this suite, preserving their order.
    pub fn add_properties(
        &mut self,
        properties: impl IntoIterator<Item = impl Into<Property>>,
    ) -> &mut Self {
        for property in properties {
            self.add_property(property);
        }
        self
    }

    /// Appends a test case.
    pub fn add_test_case(&mut self, test_case: TestCase) -> &mut Self {
        self.test_cases.push(test_case);
        self
    }

    /// Appends several test cases, preserving their order.
    pub fn add_test_cases(&mut self, test_cases: impl IntoIterator<Item = TestCase>) -> &mut Self {
        self.test_cases.extend(test_cases);
        self
    }

    /// Computes the summary counters from the current test cases.
    pub fn counts(&self) -> SuiteCounts {
        let mut counts = SuiteCounts::default();
        for test_case in &self.test_cases {
            counts.tests += 1;
            counts.time += test_case.time;
            match &test_case.status {
                TestCaseStatus::Success => {}
                TestCaseStatus::NonSuccess { kind, .. } => match kind {
                    NonSuccessKind::Failure => counts.failures += 1,
                    NonSuccessKind::Error => counts.errors += 1,
                },
                TestCaseStatus::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }
}

/// Summary counters of a [`TestSuite`], derived from its test cases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SuiteCounts {
    /// The number of test cases.
    pub tests: usize,

    /// The number of test cases with a `failure` child.
    pub failures: usize,

    /// The number of test cases with an `error` child.
    pub errors: usize,

    /// The number of test cases with a `skipped` child.
    pub skipped: usize,

    /// The sum of the test case durations.
    pub time: Duration,
}

/// Represents a single test case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    /// The qualified group name of the test, e.g. `tests.test_math.TestAdd`.
    pub classname: String,

    /// The name of the test.
    pub name: String,

    /// The source file the test is defined in.
    pub file: Option<String>,

    /// The line in `file` the test is defined at.
    pub line: Option<u32>,

    /// The time it took to execute this test case, rounded to whole milliseconds.
    pub time: Duration,

    /// The outcome of this test case.
    pub status: TestCaseStatus,

    /// Per-test properties, e.g. the docstring or attachments.
    pub properties: Vec<Property>,
}

impl TestCase {
    /// Creates a new test case with a zero duration.
    pub fn new(
        classname: impl Into<String>,
        name: impl Into<String>,
        status: TestCaseStatus,
    ) -> Self {
        Self {
            classname: classname.into(),
            name: name.into(),
            file: None,
            line: None,
            time: Duration::ZERO,
            status,
            properties: vec![],
        }
    }

    /// Sets the source file.
    pub fn set_file(&mut self, file: impl Into<String>) -> &mut Self {
        self.file = Some(file.into());
        self
    }

    /// Sets the source line.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.line = Some(line);
        self
    }

    /// Sets the time taken, rounded to the nearest millisecond.
    ///
    /// Rounding here keeps the suite's `time` equal to the sum of the rendered per-case values.
    pub fn set_time(&mut self, time: Duration) -> &mut Self {
        self.time = round_to_millis(time);
        self
    }

    /// Adds a property to this test case.
    pub fn add_property(&mut self, property: impl Into<Property>) -> &mut Self {
        self.properties.push(property.into());
        self
    }

    /// Adds several properties to this test case, preserving their order.
    pub fn add_properties(
        &mut self,
        properties: impl IntoIterator<Item = impl Into<Property>>,
    ) -> &mut Self {
        for property in properties {
            self.add_property(property);
        }
        self
    }

    /// Serializes this test case as a standalone fragment document.
    pub fn serialize_fragment(&self, writer: impl io::Write) -> Result<(), SerializeError> {
        Ok(serialize_fragment(self, writer)?)
    }

    /// Serializes this test case as a standalone fragment document, returning a string.
    pub fn to_fragment_string(&self) -> Result<String, SerializeError> {
        let mut buf: Vec<u8> = vec![];
        self.serialize_fragment(&mut buf)?;
        String::from_utf8(buf).map_err(|utf8_err| {
            SerializeError::from(quick_xml::Error::NonDecodable(Some(utf8_err.utf8_error())))
        })
    }

    /// Reads a test case back from a fragment document whose root is `<testcase>`.
    pub fn deserialize_fragment_str(xml: &str) -> Result<Self, DeserializeError> {
        deserialize_fragment(xml)
    }
}

/// Represents the outcome of a test case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestCaseStatus {
    /// This test case passed.
    Success,

    /// This test case did not pass.
    NonSuccess {
        /// Whether the test failed (`failure`) or errored (`error`).
        kind: NonSuccessKind,

        /// The failure message.
        message: Option<String>,

        /// The "type" of failure that occurred.
        ty: Option<String>,

        /// The description of the failure, usually a trace.
        ///
        /// This is serialized and deserialized from the text node of the element.
        description: Option<String>,
    },

    /// This test case was skipped.
    Skipped {
        /// The skip message.
        message: Option<String>,

        /// The "type" of skip that occurred.
        ty: Option<String>,

        /// The description of the skip.
        ///
        /// This is serialized and deserialized from the text node of the element.
        description: Option<String>,
    },
}

impl TestCaseStatus {
    /// Creates a new `TestCaseStatus` that represents a successful test.
    pub fn success() -> Self {
        TestCaseStatus::Success
    }

    /// Creates a new `TestCaseStatus` that represents an unsuccessful test.
    pub fn non_success(kind: NonSuccessKind) -> Self {
        TestCaseStatus::NonSuccess {
            kind,
            message: None,
            ty: None,
            description: None,
        }
    }

    /// Creates a new `TestCaseStatus` that represents a skipped test.
    pub fn skipped() -> Self {
        TestCaseStatus::Skipped {
            message: None,
            ty: None,
            description: None,
        }
    }

    /// Sets the message. No-op if this is a success case.
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        let message_mut = match self {
            TestCaseStatus::Success => return self,
            TestCaseStatus::NonSuccess { message, .. } => message,
            TestCaseStatus::Skipped { message, .. } => message,
        };
        *message_mut = Some(message.into());
        self
    }

    /// Sets the type. No-op if this is a success case.
    pub fn set_type(&mut self, ty: impl Into<String>) -> &mut Self {
        let ty_mut = match self {
            TestCaseStatus::Success => return self,
            TestCaseStatus::NonSuccess { ty, .. } => ty,
            TestCaseStatus::Skipped { ty, .. } => ty,
        };
        *ty_mut = Some(ty.into());
        self
    }

    /// Sets the description (text node). No-op if this is a success case.
    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        let description_mut = match self {
            TestCaseStatus::Success => return self,
            TestCaseStatus::NonSuccess { description, .. } => description,
            TestCaseStatus::Skipped { description, .. } => description,
        };
        *description_mut = Some(description.into());
        self
    }

    /// Returns the message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            TestCaseStatus::Success => None,
            TestCaseStatus::NonSuccess { message, .. } | TestCaseStatus::Skipped { message, .. } => {
                message.as_deref()
            }
        }
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        match self {
            TestCaseStatus::Success => None,
            TestCaseStatus::NonSuccess { description, .. }
            | TestCaseStatus::Skipped { description, .. } => description.as_deref(),
        }
    }
}

/// Whether a non-successful test case failed or errored.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NonSuccessKind {
    /// The test body failed. Serialized as `failure`.
    Failure,

    /// The test could not be set up. Serialized as `error`.
    Error,
}

/// A named string value attached to a suite or test case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    /// The name of the property.
    pub name: String,

    /// The value of the property.
    pub value: String,
}

impl Property {
    /// Creates a new `Property` instance.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl<T> From<(T, T)> for Property
where
    T: Into<String>,
{
    fn from((k, v): (T, T)) -> Self {
        Property::new(k, v)
    }
}

pub(crate) fn round_to_millis(time: Duration) -> Duration {
    let millis = (time.as_nanos() + 500_000) / 1_000_000;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Formats a duration as seconds with exactly three fractional digits.
pub fn format_time(time: Duration) -> String {
    let millis = round_to_millis(time).as_millis();
    format!("{}.{:03}", millis / 1000, millis % 1000)
}
