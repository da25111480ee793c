// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Crash-safe, multi-process accumulation of a JUnit XML report.
//!
//! The report on disk is kept valid and complete after every test: either each finished test
//! case is appended to it in place under a cross-process lock, or each test case is written as
//! a fragment and all fragments are merged into the report exactly once at the end of the run
//! (or when the run is interrupted).
//!
//! The entry point is [`session::ReportSession`], driven by the host test runner's lifecycle
//! events. The building blocks are usable on their own:
//!
//! * [`accumulator::Accumulator`] owns the report document.
//! * [`fragment::FragmentWriter`] writes per-test fragments.
//! * [`lock::SentinelLock`] serializes report writers across processes.
//! * [`testcase::TestCaseBuilder`] turns host events into test cases.

pub mod accumulator;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod events;
pub mod fragment;
pub mod lock;
pub mod metadata;
pub mod session;
pub mod signal;
pub mod testcase;
pub mod traceback;
pub mod tracker;

pub use junit_report;
