// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read back documents and fragments produced by the serializer.
//!
//! The reader is deliberately tolerant of elements it does not know about (they are skipped),
//! and ignores summary counters since those are always derived from the test cases.

use crate::{
    DeserializeError, NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite,
    report::{TIMESTAMP_FORMAT, round_to_millis},
    serialize::{
        ERROR_TAG, FAILURE_TAG, PROPERTIES_TAG, PROPERTY_TAG, SKIPPED_TAG, TESTCASE_TAG,
        TESTSUITE_TAG, TESTSUITES_TAG,
    },
};
use chrono::NaiveDateTime;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::time::Duration;

type XmlReader<'a> = Reader<&'a [u8]>;

pub(crate) fn deserialize_report(xml: &str) -> Result<Report, DeserializeError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(start) if is(&start, TESTSUITES_TAG) => {
                let test_suite = read_test_suites(&mut reader)?;
                return Ok(Report::new(test_suite));
            }
            Event::Empty(start) if is(&start, TESTSUITES_TAG) => {
                return Err(DeserializeError::MissingElement {
                    element: TESTSUITE_TAG,
                });
            }
            Event::Start(start) | Event::Empty(start) => {
                return Err(DeserializeError::UnexpectedRoot {
                    expected: TESTSUITES_TAG,
                    found: name_of(&start),
                });
            }
            Event::Eof => {
                return Err(DeserializeError::MissingElement {
                    element: TESTSUITES_TAG,
                });
            }
            _ => {}
        }
    }
}

pub(crate) fn deserialize_fragment(xml: &str) -> Result<TestCase, DeserializeError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(start) if is(&start, TESTCASE_TAG) => {
                return read_test_case(&mut reader, &start, false);
            }
            Event::Empty(start) if is(&start, TESTCASE_TAG) => {
                return read_test_case(&mut reader, &start, true);
            }
            Event::Start(start) | Event::Empty(start) => {
                return Err(DeserializeError::UnexpectedRoot {
                    expected: TESTCASE_TAG,
                    found: name_of(&start),
                });
            }
            Event::Eof => {
                return Err(DeserializeError::MissingElement {
                    element: TESTCASE_TAG,
                });
            }
            _ => {}
        }
    }
}

fn read_test_suites(reader: &mut XmlReader<'_>) -> Result<TestSuite, DeserializeError> {
    let mut test_suite = None;
    loop {
        match reader.read_event()? {
            Event::Start(start) if is(&start, TESTSUITE_TAG) => {
                if test_suite.is_some() {
                    return Err(DeserializeError::MultipleTestSuites);
                }
                test_suite = Some(read_test_suite(reader, &start, false)?);
            }
            Event::Empty(start) if is(&start, TESTSUITE_TAG) => {
                if test_suite.is_some() {
                    return Err(DeserializeError::MultipleTestSuites);
                }
                test_suite = Some(read_test_suite(reader, &start, true)?);
            }
            Event::Start(start) => skip_element(reader, &start)?,
            Event::End(_) => break,
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: TESTSUITES_TAG,
                });
            }
            _ => {}
        }
    }

    test_suite.ok_or(DeserializeError::MissingElement {
        element: TESTSUITE_TAG,
    })
}

fn read_test_suite(
    reader: &mut XmlReader<'_>,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<TestSuite, DeserializeError> {
    let attrs = Attributes::new(start, TESTSUITE_TAG)?;
    let mut test_suite = TestSuite::new(attrs.required("name")?);
    if let Some(timestamp) = attrs.get("timestamp") {
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| attrs.invalid("timestamp", timestamp))?;
        test_suite.set_timestamp(timestamp);
    }
    if let Some(hostname) = attrs.get("hostname") {
        test_suite.set_hostname(hostname);
    }

    if empty {
        return Ok(test_suite);
    }

    loop {
        match reader.read_event()? {
            Event::Start(start) if is(&start, PROPERTIES_TAG) => {
                test_suite.add_properties(read_properties(reader)?);
            }
            Event::Start(start) if is(&start, TESTCASE_TAG) => {
                test_suite.add_test_case(read_test_case(reader, &start, false)?);
            }
            Event::Empty(start) if is(&start, TESTCASE_TAG) => {
                test_suite.add_test_case(read_test_case(reader, &start, true)?);
            }
            Event::Start(start) => skip_element(reader, &start)?,
            Event::End(_) => break,
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: TESTSUITE_TAG,
                });
            }
            _ => {}
        }
    }

    Ok(test_suite)
}

fn read_test_case(
    reader: &mut XmlReader<'_>,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<TestCase, DeserializeError> {
    let attrs = Attributes::new(start, TESTCASE_TAG)?;
    let mut test_case = TestCase::new(
        attrs.required("classname")?,
        attrs.required("name")?,
        TestCaseStatus::success(),
    );
    if let Some(file) = attrs.get("file") {
        test_case.set_file(file);
    }
    if let Some(line) = attrs.get("line") {
        let line = line.parse().map_err(|_| attrs.invalid("line", line))?;
        test_case.set_line(line);
    }
    if let Some(time) = attrs.get("time") {
        let time = parse_time(time).ok_or_else(|| attrs.invalid("time", time))?;
        test_case.set_time(time);
    }

    if empty {
        return Ok(test_case);
    }

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if let Some(status) = status_for(&start) {
                    test_case.status = read_status(reader, &start, status, false)?;
                } else if is(&start, PROPERTIES_TAG) {
                    test_case.add_properties(read_properties(reader)?);
                } else {
                    skip_element(reader, &start)?;
                }
            }
            Event::Empty(start) => {
                if let Some(status) = status_for(&start) {
                    test_case.status = read_status(reader, &start, status, true)?;
                }
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: TESTCASE_TAG,
                });
            }
            _ => {}
        }
    }

    Ok(test_case)
}

fn status_for(start: &BytesStart<'_>) -> Option<(TestCaseStatus, &'static str)> {
    if is(start, FAILURE_TAG) {
        Some((
            TestCaseStatus::non_success(NonSuccessKind::Failure),
            FAILURE_TAG,
        ))
    } else if is(start, ERROR_TAG) {
        Some((TestCaseStatus::non_success(NonSuccessKind::Error), ERROR_TAG))
    } else if is(start, SKIPPED_TAG) {
        Some((TestCaseStatus::skipped(), SKIPPED_TAG))
    } else {
        None
    }
}

fn read_status(
    reader: &mut XmlReader<'_>,
    start: &BytesStart<'_>,
    (mut status, tag_name): (TestCaseStatus, &'static str),
    empty: bool,
) -> Result<TestCaseStatus, DeserializeError> {
    let attrs = Attributes::new(start, tag_name)?;
    if let Some(message) = attrs.get("message") {
        status.set_message(message);
    }
    if let Some(ty) = attrs.get("type") {
        status.set_type(ty);
    }

    if empty {
        return Ok(status);
    }

    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(cdata) => text.push_str(&String::from_utf8_lossy(&cdata)),
            Event::Start(start) => skip_element(reader, &start)?,
            Event::End(_) => break,
            Event::Eof => return Err(DeserializeError::UnexpectedEof { element: tag_name }),
            _ => {}
        }
    }
    // An element with a body, even an empty one, was written from a description.
    status.set_description(text);

    Ok(status)
}

fn read_properties(reader: &mut XmlReader<'_>) -> Result<Vec<Property>, DeserializeError> {
    let mut properties = vec![];
    loop {
        match reader.read_event()? {
            Event::Empty(start) if is(&start, PROPERTY_TAG) => {
                properties.push(read_property(&start)?);
            }
            Event::Start(start) if is(&start, PROPERTY_TAG) => {
                properties.push(read_property(&start)?);
                skip_element(reader, &start)?;
            }
            Event::Start(start) => skip_element(reader, &start)?,
            Event::End(_) => break,
            Event::Eof => {
                return Err(DeserializeError::UnexpectedEof {
                    element: PROPERTIES_TAG,
                });
            }
            _ => {}
        }
    }
    Ok(properties)
}

fn read_property(start: &BytesStart<'_>) -> Result<Property, DeserializeError> {
    let attrs = Attributes::new(start, PROPERTY_TAG)?;
    Ok(Property::new(
        attrs.required("name")?,
        attrs.required("value")?,
    ))
}

fn skip_element(reader: &mut XmlReader<'_>, start: &BytesStart<'_>) -> Result<(), DeserializeError> {
    reader.read_to_end(start.name())?;
    Ok(())
}

fn parse_time(input: &str) -> Option<Duration> {
    let secs: f64 = input.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(round_to_millis(Duration::from_secs_f64(secs)))
}

fn is(start: &BytesStart<'_>, tag_name: &str) -> bool {
    start.name().as_ref() == tag_name.as_bytes()
}

fn name_of(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// The unescaped attributes of one element.
struct Attributes {
    element: &'static str,
    values: Vec<(String, String)>,
}

impl Attributes {
    fn new(start: &BytesStart<'_>, element: &'static str) -> Result<Self, DeserializeError> {
        let mut values = vec![];
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            values.push((key, value));
        }
        Ok(Self { element, values })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &'static str) -> Result<&str, DeserializeError> {
        self.get(key).ok_or(DeserializeError::MissingAttribute {
            element: self.element,
            attribute: key,
        })
    }

    fn invalid(&self, key: &'static str, value: &str) -> DeserializeError {
        DeserializeError::InvalidAttribute {
            element: self.element,
            attribute: key,
            value: value.to_owned(),
        }
    }
}
