// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `ijunit` command: incremental JUnit reports for test runners that can emit JSON-lines
//! events.
//!
//! A distributed run typically looks like:
//!
//! ```text
//! ijunit start --report out/junit.xml --topology distributed
//! INCREMENTAL_JUNIT_WORKER=gw0 ijunit record --report out/junit.xml --topology distributed < gw0.jsonl
//! INCREMENTAL_JUNIT_WORKER=gw1 ijunit record --report out/junit.xml --topology distributed < gw1.jsonl
//! ijunit merge --report out/junit.xml
//! ```

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
