// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session-level metadata attached to the suite.

use crate::enrichment::EnrichmentRegistry;
use junit_report::Property;
use std::{net::ToSocketAddrs, sync::Arc};
use tracing::debug;

/// The value used when the host name or address can't be determined.
pub static UNKNOWN_HOST: &str = "unknown";

/// The identity of the machine the run executes on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostIdentity {
    /// The host name.
    pub hostname: String,

    /// The address the host name resolves to.
    pub ip_address: String,
}

impl HostIdentity {
    /// Detects the identity of the current host.
    pub fn detect() -> Self {
        let hostname = imp::hostname().unwrap_or_else(|| UNKNOWN_HOST.to_owned());
        let ip_address = resolve_address(&hostname).unwrap_or_else(|| UNKNOWN_HOST.to_owned());
        Self {
            hostname,
            ip_address,
        }
    }

    /// Creates a fixed identity.
    pub fn new(hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address: ip_address.into(),
        }
    }
}

/// Resolves a host name, preferring IPv4 addresses.
fn resolve_address(hostname: &str) -> Option<String> {
    let addrs: Vec<_> = match (hostname, 0).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(error) => {
            debug!(hostname, %error, "failed to resolve host name");
            return None;
        }
    };
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .map(|addr| addr.ip().to_string())
}

/// The run-level properties written to the suite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionMetadata {
    /// The host identity. Also used for the suite's `hostname` attribute.
    pub host: HostIdentity,

    /// Properties contributed by enrichers, in registration order.
    pub contributions: Vec<Property>,
}

impl SessionMetadata {
    /// Returns every property, host identity first.
    pub fn properties(&self) -> Vec<Property> {
        let mut properties = vec![
            Property::new("ip_address", &self.host.ip_address),
            Property::new("hostname", &self.host.hostname),
        ];
        properties.extend(self.contributions.iter().cloned());
        properties
    }
}

/// Produces [`SessionMetadata`] whenever a fresh report document is built.
///
/// Enrichers are consulted each time, so contributions reflect the state at merge time.
#[derive(Clone, Debug)]
pub struct MetadataSource {
    host: HostIdentity,
    enrichment: Arc<EnrichmentRegistry>,
}

impl MetadataSource {
    /// Creates a new source.
    pub fn new(host: HostIdentity, enrichment: Arc<EnrichmentRegistry>) -> Self {
        Self { host, enrichment }
    }

    /// Returns the host identity.
    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Collects the current metadata.
    pub fn collect(&self) -> SessionMetadata {
        SessionMetadata {
            host: self.host.clone(),
            contributions: self.enrichment.session_metadata(),
        }
    }
}

impl Default for MetadataSource {
    fn default() -> Self {
        Self::new(HostIdentity::detect(), Arc::default())
    }
}

#[cfg(unix)]
mod imp {
    pub(super) fn hostname() -> Option<String> {
        nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
    }
}

#[cfg(not(unix))]
mod imp {
    pub(super) fn hostname() -> Option<String> {
        std::env::var("COMPUTERNAME")
            .ok()
            .filter(|name| !name.is_empty())
    }
}
