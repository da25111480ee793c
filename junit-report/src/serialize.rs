// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialize a `Report` or a single `TestCase` fragment.

use crate::{
    NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite,
    report::{TIMESTAMP_FORMAT, format_time},
};
use quick_xml::{
    Writer,
    escape::partial_escape,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::{
    borrow::Cow,
    io::{self, Write},
};

pub(crate) static TESTSUITES_TAG: &str = "testsuites";
pub(crate) static TESTSUITE_TAG: &str = "testsuite";
pub(crate) static TESTCASE_TAG: &str = "testcase";
pub(crate) static PROPERTIES_TAG: &str = "properties";
pub(crate) static PROPERTY_TAG: &str = "property";
pub(crate) static FAILURE_TAG: &str = "failure";
pub(crate) static ERROR_TAG: &str = "error";
pub(crate) static SKIPPED_TAG: &str = "skipped";

pub(crate) fn serialize_report(report: &Report, writer: impl io::Write) -> quick_xml::Result<()> {
    let mut writer = new_writer(writer)?;

    serialize_empty_start_tag(TESTSUITES_TAG, &mut writer)?;
    serialize_test_suite(&report.test_suite, &mut writer)?;
    serialize_end_tag(TESTSUITES_TAG, &mut writer)?;

    // Add a trailing newline.
    writer.get_mut().write_all(b"\n")?;
    Ok(())
}

pub(crate) fn serialize_fragment(
    test_case: &TestCase,
    writer: impl io::Write,
) -> quick_xml::Result<()> {
    let mut writer = new_writer(writer)?;
    serialize_test_case(test_case, &mut writer)?;
    writer.get_mut().write_all(b"\n")?;
    Ok(())
}

fn new_writer<W: io::Write>(writer: W) -> quick_xml::Result<Writer<W>> {
    let mut writer = Writer::new_with_indent(writer, b'\t', 1);
    let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
    writer.write_event(Event::Decl(decl))?;
    Ok(writer)
}

fn serialize_test_suite(
    test_suite: &TestSuite,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    // Use the destructuring syntax to ensure that all fields are handled.
    let TestSuite {
        name,
        timestamp,
        hostname,
        properties,
        test_cases,
    } = test_suite;
    let counts = test_suite.counts();

    let mut test_suite_tag = BytesStart::new(TESTSUITE_TAG);
    test_suite_tag.push_attribute(("name", &*xml_safe(name)));
    if let Some(timestamp) = timestamp {
        let timestamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        test_suite_tag.push_attribute(("timestamp", timestamp.as_str()));
    }
    if let Some(hostname) = hostname {
        test_suite_tag.push_attribute(("hostname", &*xml_safe(hostname)));
    }
    test_suite_tag.extend_attributes([
        ("tests", counts.tests.to_string().as_str()),
        ("failures", counts.failures.to_string().as_str()),
        ("errors", counts.errors.to_string().as_str()),
        ("skipped", counts.skipped.to_string().as_str()),
        ("time", format_time(counts.time).as_str()),
    ]);
    writer.write_event(Event::Start(test_suite_tag))?;

    serialize_properties(properties, writer)?;
    for test_case in test_cases {
        serialize_test_case(test_case, writer)?;
    }

    serialize_end_tag(TESTSUITE_TAG, writer)
}

fn serialize_test_case(
    test_case: &TestCase,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let TestCase {
        classname,
        name,
        file,
        line,
        time,
        status,
        properties,
    } = test_case;

    let mut test_case_tag = BytesStart::new(TESTCASE_TAG);
    test_case_tag.push_attribute(("classname", &*xml_safe(classname)));
    test_case_tag.push_attribute(("name", &*xml_safe(name)));
    if let Some(file) = file {
        test_case_tag.push_attribute(("file", &*xml_safe(file)));
    }
    if let Some(line) = line {
        test_case_tag.push_attribute(("line", line.to_string().as_str()));
    }
    test_case_tag.push_attribute(("time", format_time(*time).as_str()));

    if matches!(status, TestCaseStatus::Success) && properties.is_empty() {
        return writer.write_event(Event::Empty(test_case_tag));
    }
    writer.write_event(Event::Start(test_case_tag))?;

    match status {
        TestCaseStatus::Success => {}
        TestCaseStatus::NonSuccess {
            kind,
            message,
            ty,
            description,
        } => {
            let tag_name = match kind {
                NonSuccessKind::Failure => FAILURE_TAG,
                NonSuccessKind::Error => ERROR_TAG,
            };
            serialize_status(
                message.as_deref(),
                ty.as_deref(),
                description.as_deref(),
                tag_name,
                writer,
            )?;
        }
        TestCaseStatus::Skipped {
            message,
            ty,
            description,
        } => {
            serialize_status(
                message.as_deref(),
                ty.as_deref(),
                description.as_deref(),
                SKIPPED_TAG,
                writer,
            )?;
        }
    }

    serialize_properties(properties, writer)?;

    serialize_end_tag(TESTCASE_TAG, writer)
}

fn serialize_status(
    message: Option<&str>,
    ty: Option<&str>,
    description: Option<&str>,
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    let mut tag = BytesStart::new(tag_name);
    if let Some(ty) = ty {
        tag.push_attribute(("type", &*xml_safe(ty)));
    }
    if let Some(message) = message {
        tag.push_attribute(("message", &*xml_safe(message)));
    }

    match description {
        Some(description) => {
            writer.write_event(Event::Start(tag))?;
            let description = xml_safe(description);
            // Text nodes only need `&`, `<` and `>` escaped; quotes are kept readable.
            let text = BytesText::from_escaped(partial_escape(&description));
            writer.write_event(Event::Text(text))?;
            serialize_end_tag(tag_name, writer)
        }
        None => writer.write_event(Event::Empty(tag)),
    }
}

fn serialize_properties(
    properties: &[Property],
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    if properties.is_empty() {
        return Ok(());
    }

    serialize_empty_start_tag(PROPERTIES_TAG, writer)?;
    for property in properties {
        let mut property_tag = BytesStart::new(PROPERTY_TAG);
        property_tag.push_attribute(("name", &*xml_safe(&property.name)));
        property_tag.push_attribute(("value", &*xml_safe(&property.value)));
        writer.write_event(Event::Empty(property_tag))?;
    }
    serialize_end_tag(PROPERTIES_TAG, writer)
}

fn serialize_empty_start_tag(
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag_name)))
}

fn serialize_end_tag(
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> quick_xml::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag_name)))
}

/// Strips ANSI escapes and characters that XML 1.0 cannot represent.
///
/// Failure traces frequently carry terminal color codes.
fn xml_safe(input: &str) -> Cow<'_, str> {
    let needs_cleanup = input
        .chars()
        .any(|c| matches!(c, '\x00'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f'));
    if !needs_cleanup {
        return Cow::Borrowed(input);
    }

    let stripped = strip_ansi_escapes::strip_str(input);
    Cow::Owned(stripped.replace(
        |c| matches!(c, '\x00'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f'),
        "",
    ))
}
