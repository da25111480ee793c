// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events delivered by the host test runner.
//!
//! A host reports each test in phases (`setup`, `call`, `teardown`) through
//! [`TestReportEvent`]s, then signals that the test is fully done with a [`TestTeardown`]. Both
//! can be read from a stream of JSON lines with [`HostEventReader`], which is how out-of-process
//! hosts drive the `ijunit` binary.

use crate::errors::HostEventParseError;
use camino::Utf8Path;
use junit_report::Property;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{io::BufRead, time::Duration};

/// The phase of a test a report is for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestPhase {
    /// Fixture setup.
    Setup,

    /// The test body.
    Call,

    /// Fixture teardown.
    Teardown,
}

/// The outcome of a single phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The phase passed.
    Passed,

    /// The phase failed.
    Failed,

    /// The test was skipped.
    Skipped,

    /// The phase failed and the test will be run again. Never recorded.
    Rerun,
}

/// The report for one phase of one test.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestReportEvent {
    /// The unique id of the test within the run, e.g. `tests/test_a.py::TestX::test_y[1]`.
    pub node_id: String,

    /// The phase this report is for.
    pub phase: TestPhase,

    /// The outcome of the phase.
    pub outcome: Outcome,

    /// How long the phase took. Serialized as fractional seconds.
    #[serde(default, with = "duration_secs")]
    pub duration: Duration,

    /// Failure details, for failed phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,

    /// Skip details, for skipped tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipDetail>,
}

impl TestReportEvent {
    /// Returns true if this report is a candidate for the recorded result of its test.
    ///
    /// Only setup and call reports count, and reruns never do.
    pub fn is_recordable(&self) -> bool {
        matches!(self.phase, TestPhase::Setup | TestPhase::Call) && self.outcome != Outcome::Rerun
    }
}

/// Why a phase failed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FailureDetail {
    /// A structured trace: a one-line crash summary plus trace entries.
    Structured {
        /// The one-line crash summary, e.g. `AssertionError: x != y`.
        crash_message: String,

        /// Trace entries, outermost first.
        entries: Vec<TracebackEntry>,
    },

    /// Unstructured text, used verbatim as both the message and the body.
    Plain(String),
}

impl FailureDetail {
    /// Returns the message attribute for this failure.
    pub fn message(&self) -> &str {
        match self {
            FailureDetail::Structured { crash_message, .. } => crash_message,
            FailureDetail::Plain(text) => text,
        }
    }
}

/// One entry of a structured trace.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TracebackEntry {
    /// An entry made of individual lines.
    Lines {
        /// The lines of the entry.
        lines: Vec<String>,
    },

    /// An entry made of a single block of text.
    Text {
        /// The text, split on newlines when cleaned.
        text: String,
    },
}

impl TracebackEntry {
    /// Returns the lines of this entry.
    pub fn lines(&self) -> Vec<&str> {
        match self {
            TracebackEntry::Lines { lines } => lines.iter().map(String::as_str).collect(),
            TracebackEntry::Text { text } => text.split('\n').collect(),
        }
    }
}

/// Where and why a test was skipped.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SkipDetail {
    /// The file the skip was raised from.
    pub file: String,

    /// The line the skip was raised from.
    pub line: u32,

    /// The skip reason.
    pub reason: String,
}

/// Signals that every phase of a test has finished.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestTeardown {
    /// The unique id of the test, matching [`TestReportEvent::node_id`].
    pub node_id: String,

    /// The group name. Derived from the node id if not provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classname: Option<String>,

    /// The test name, e.g. `test_y[1]`.
    pub name: String,

    /// The file the test is defined in.
    pub file: String,

    /// The line the test is defined at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Properties supplied by the host for this test, e.g. its docstring or attachments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<EventProperty>,
}

/// A name/value pair supplied by the host in a [`TestTeardown`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventProperty {
    /// The property name.
    pub name: String,

    /// The property value.
    pub value: String,
}

impl From<&EventProperty> for Property {
    fn from(property: &EventProperty) -> Self {
        Property::new(property.name.as_str(), property.value.as_str())
    }
}

impl TestTeardown {
    /// Returns the classname, deriving it from the node id if it wasn't provided.
    pub fn classname(&self) -> String {
        match &self.classname {
            Some(classname) => classname.clone(),
            None => derive_classname(&self.node_id, &self.file),
        }
    }
}

/// An event from the host, as read from a JSON-lines stream.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostEvent {
    /// A phase report.
    Report(TestReportEvent),

    /// A test finished all its phases.
    Teardown(TestTeardown),
}

/// Derives a dotted group name for a test.
///
/// Node ids with more than two `::`-separated parts (i.e. tests inside a class) use every part
/// but the last, joined with `.`, with path separators turned into dots. Other tests use the
/// stem of their file name.
pub fn derive_classname(node_id: &str, file: &str) -> String {
    let parts: Vec<&str> = node_id.split("::").collect();
    if parts.len() > 2 {
        parts[..parts.len() - 1].join(".").replace('/', ".")
    } else {
        // Backslashes separate paths on Windows hosts.
        let file = file.rsplit(['/', '\\']).next().unwrap_or(file);
        Utf8Path::new(file).file_stem().unwrap_or(file).to_owned()
    }
}

/// Reads [`HostEvent`]s from JSON lines. Blank lines are skipped.
#[derive(Debug)]
pub struct HostEventReader<R> {
    reader: R,
    line_number: usize,
    buf: String,
}

impl<R: BufRead> HostEventReader<R> {
    /// Creates a new reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for HostEventReader<R> {
    type Item = Result<HostEvent, HostEventParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            self.line_number += 1;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(error) => {
                    return Some(Err(HostEventParseError::Read {
                        line_number: self.line_number,
                        error,
                    }));
                }
            }

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return Some(serde_json::from_str(line).map_err(|error| {
                HostEventParseError::Deserialize {
                    line_number: self.line_number,
                    error,
                }
            }));
        }
    }
}

mod duration_secs {
    use super::*;

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(format!(
                "duration must be a finite, non-negative number of seconds, found {secs}"
            ))
        })
    }
}
