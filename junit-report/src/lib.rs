// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Build, write and read back single-suite JUnit reports.
//!
//! A [`Report`] holds exactly one [`TestSuite`]. The suite's summary counters (`tests`,
//! `failures`, `errors`, `skipped` and `time`) are never stored: they are derived from the test
//! cases every time they are asked for, and recomputed when a document is serialized. Counter
//! values present in a document that is read back are ignored.
//!
//! Individual [`TestCase`]s can also be written as standalone documents (fragments) and read
//! back with [`TestCase::deserialize_fragment_str`].

mod deserialize;
mod errors;
mod report;
mod serialize;

pub use errors::*;
pub use report::*;
