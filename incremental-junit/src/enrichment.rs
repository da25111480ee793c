// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extension points for attaching extra properties to the report.
//!
//! An [`Enricher`] can contribute name/value pairs at two points: once per run, as session
//! metadata on the suite, and once per completed test, as properties on its test case. All
//! registered enrichers are consulted in registration order and their contributions are
//! concatenated.
//!
//! Enrichers are not trusted to succeed. A failing enricher is logged and contributes nothing;
//! the report is still written.

use crate::{
    errors::{BoxedError, DisplayErrorChain, EnrichmentError},
    events::{TestReportEvent, TestTeardown},
};
use junit_report::Property;
use std::fmt;
use tracing::warn;

/// A completed test, as seen by enrichers.
#[derive(Clone, Copy, Debug)]
pub struct CompletedTest<'a> {
    /// The report that is being recorded for the test.
    pub report: &'a TestReportEvent,

    /// The teardown event that completed the test.
    pub teardown: &'a TestTeardown,
}

impl CompletedTest<'_> {
    /// Returns the unique id of the test.
    pub fn node_id(&self) -> &str {
        &self.teardown.node_id
    }
}

/// Contributes properties to the report.
pub trait Enricher: Send + Sync {
    /// A short name for this enricher, used in log messages.
    fn name(&self) -> &str;

    /// Returns properties describing the run environment.
    fn session_metadata(&self) -> Result<Vec<Property>, BoxedError> {
        Ok(Vec::new())
    }

    /// Returns properties for a completed test.
    fn test_case_properties(&self, _test: &CompletedTest<'_>) -> Result<Vec<Property>, BoxedError> {
        Ok(Vec::new())
    }
}

/// Contributes the properties supplied by the host: fixed session metadata, and the
/// [`properties`](TestTeardown::properties) of each teardown event.
///
/// Every session registers this enricher ahead of any other.
#[derive(Clone, Debug, Default)]
pub struct HostProperties {
    session: Vec<Property>,
}

impl HostProperties {
    /// Creates an enricher contributing `session` as session metadata.
    pub fn new(session: Vec<Property>) -> Self {
        Self { session }
    }
}

impl Enricher for HostProperties {
    fn name(&self) -> &str {
        "host-properties"
    }

    fn session_metadata(&self) -> Result<Vec<Property>, BoxedError> {
        Ok(self.session.clone())
    }

    fn test_case_properties(&self, test: &CompletedTest<'_>) -> Result<Vec<Property>, BoxedError> {
        Ok(test.teardown.properties.iter().map(Property::from).collect())
    }
}

/// The set of registered enrichers.
#[derive(Default)]
pub struct EnrichmentRegistry {
    enrichers: Vec<Box<dyn Enricher>>,
}

impl EnrichmentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an enricher. Enrichers are consulted in registration order.
    pub fn register(&mut self, enricher: impl Enricher + 'static) -> &mut Self {
        self.enrichers.push(Box::new(enricher));
        self
    }

    /// Moves every enricher of `other` to the end of this registry.
    pub fn extend(&mut self, other: EnrichmentRegistry) -> &mut Self {
        self.enrichers.extend(other.enrichers);
        self
    }

    /// Returns true if no enrichers are registered.
    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }

    /// Collects session metadata from every enricher.
    pub fn session_metadata(&self) -> Vec<Property> {
        self.collect(|enricher| enricher.session_metadata())
    }

    /// Collects properties for a completed test from every enricher.
    pub fn test_case_properties(&self, test: &CompletedTest<'_>) -> Vec<Property> {
        self.collect(|enricher| enricher.test_case_properties(test))
    }

    fn collect<F>(&self, mut f: F) -> Vec<Property>
    where
        F: FnMut(&dyn Enricher) -> Result<Vec<Property>, BoxedError>,
    {
        let mut properties = Vec::new();
        for enricher in &self.enrichers {
            match f(enricher.as_ref()) {
                Ok(contributed) => properties.extend(contributed),
                Err(error) => {
                    let error = EnrichmentError::new(enricher.name(), error);
                    warn!("{}", DisplayErrorChain::new(&error));
                }
            }
        }
        properties
    }
}

impl fmt::Debug for EnrichmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.enrichers.iter().map(|enricher| enricher.name()))
            .finish()
    }
}
