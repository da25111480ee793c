// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// An error that occurs while serializing a [`Report`](crate::Report) or a
/// [`TestCase`](crate::TestCase) fragment.
#[derive(Debug, Error)]
#[error("error serializing JUnit report")]
pub struct SerializeError {
    #[from]
    inner: quick_xml::Error,
}

/// An error that occurs while reading back a JUnit document or fragment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeserializeError {
    /// The document is not well-formed XML.
    #[error("error reading JUnit XML")]
    Xml(#[from] quick_xml::Error),

    /// The document ended before a required element was found.
    #[error("missing `<{element}>` element")]
    MissingElement {
        /// The name of the missing element.
        element: &'static str,
    },

    /// The root element is not the expected one.
    #[error("unexpected root element `<{found}>` (expected `<{expected}>`)")]
    UnexpectedRoot {
        /// The expected root element.
        expected: &'static str,

        /// The root element that was found.
        found: String,
    },

    /// A required attribute is missing.
    #[error("`<{element}>` is missing required attribute `{attribute}`")]
    MissingAttribute {
        /// The element that is missing the attribute.
        element: &'static str,

        /// The attribute that is missing.
        attribute: &'static str,
    },

    /// An attribute could not be parsed.
    #[error("invalid value `{value}` for attribute `{attribute}` on `<{element}>`")]
    InvalidAttribute {
        /// The element carrying the attribute.
        element: &'static str,

        /// The attribute name.
        attribute: &'static str,

        /// The value that failed to parse.
        value: String,
    },

    /// The document contains more than one `<testsuite>` element.
    #[error("document contains more than one `<testsuite>` element")]
    MultipleTestSuites,

    /// The document ended in the middle of an element.
    #[error("unexpected end of document inside `<{element}>`")]
    UnexpectedEof {
        /// The element that was not closed.
        element: &'static str,
    },
}
