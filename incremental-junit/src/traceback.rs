// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cleaning failure traces before they are written to the report.

use crate::events::{FailureDetail, TracebackEntry};

/// The header prepended to cleaned traces that don't already start with one.
pub static TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// The default internal-frame markers: frames from the host runner's own machinery.
pub static DEFAULT_INTERNAL_FRAME_MARKERS: &[&str] = &["/_pytest/", "/pluggy/"];

/// Removes the host runner's internal frames from failure traces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracebackCleaner {
    markers: Vec<String>,
}

impl Default for TracebackCleaner {
    fn default() -> Self {
        Self::new(DEFAULT_INTERNAL_FRAME_MARKERS.iter().copied())
    }
}

impl TracebackCleaner {
    /// Creates a cleaner dropping lines that contain any of `markers`.
    ///
    /// Markers are matched against lines with backslashes normalized to forward slashes, so
    /// they should be written with forward slashes.
    pub fn new(markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the body text for a failure.
    ///
    /// The result is never empty for a structured failure with a non-empty crash message.
    pub fn clean(&self, failure: &FailureDetail) -> String {
        match failure {
            FailureDetail::Structured {
                crash_message,
                entries,
            } => self.clean_entries(crash_message, entries),
            FailureDetail::Plain(text) => text.clone(),
        }
    }

    fn clean_entries(&self, summary: &str, entries: &[TracebackEntry]) -> String {
        let mut lines: Vec<&str> = entries
            .iter()
            .flat_map(|entry| entry.lines())
            .filter(|line| !self.is_internal(line))
            .collect();

        if lines.is_empty() {
            return summary.to_owned();
        }

        if !lines[0].trim().starts_with("Traceback") {
            lines.insert(0, TRACEBACK_HEADER);
        }
        // The summary check runs against the lines joined without separators.
        if !lines.concat().contains(summary) {
            lines.push(summary);
        }
        lines.join("\n")
    }

    fn is_internal(&self, line: &str) -> bool {
        let normalized = line.replace('\\', "/");
        self.markers
            .iter()
            .any(|marker| normalized.contains(marker.as_str()))
    }
}
