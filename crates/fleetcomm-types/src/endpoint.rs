//! Network endpoints of remote processes.
//!
//! An [`Endpoint`] is the parsed form of a locator URI such as
//! `socket://10.0.0.5:16163/?fleetcomm.type=agent&timeout=30000`. Registry and
//! cache identity is the [`EndpointKey`] (host and port only); protocol and
//! query parameters are informational.

use crate::error::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Query parameter that classifies the process behind an endpoint.
pub const ENDPOINT_TYPE_PARAMETER: &str = "fleetcomm.type";

/// Value of [`ENDPOINT_TYPE_PARAMETER`] that marks an agent endpoint.
pub const AGENT_ENDPOINT_TYPE: &str = "agent";

/// Protocol used when an agent has no declared endpoint.
pub const DEFAULT_PROTOCOL: &str = "socket";

/// Identity of an endpoint for registry and cache purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A reachable remote process: address plus transport parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport protocol (URI scheme), e.g. `socket` or `sslsocket`.
    pub protocol: String,
    /// Host exactly as it appeared in the locator; never normalized.
    pub host: String,
    /// Port the remote process listens on.
    pub port: u16,
    /// Transport parameters from the locator query string.
    pub parameters: BTreeMap<String, String>,
}

impl Endpoint {
    /// Create an endpoint with no transport parameters.
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            parameters: BTreeMap::new(),
        }
    }

    /// Create an endpoint tagged as belonging to an agent.
    pub fn agent(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::new(protocol, host, port).with_parameter(ENDPOINT_TYPE_PARAMETER, AGENT_ENDPOINT_TYPE)
    }

    /// Builder-style helper to attach a transport parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Parse a locator URI.
    pub fn parse(uri: &str) -> FleetResult<Self> {
        uri.parse()
    }

    /// The registry/cache identity of this endpoint.
    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(self.host.clone(), self.port)
    }

    /// Whether this endpoint carries the agent tag.
    pub fn is_agent(&self) -> bool {
        self.parameters
            .get(ENDPOINT_TYPE_PARAMETER)
            .map(|v| v.eq_ignore_ascii_case(AGENT_ENDPOINT_TYPE))
            .unwrap_or(false)
    }

    /// The locator URI string for this endpoint.
    pub fn uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/", self.protocol, self.host, self.port)?;
        if !self.parameters.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.parameters)
                .finish();
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| FleetError::MalformedEndpoint {
            endpoint: s.to_string(),
            reason,
        };

        let url = Url::parse(s.trim()).map_err(|e| malformed(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| malformed("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| malformed("missing port".to_string()))?;

        let parameters = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            protocol: url.scheme().to_string(),
            host: host.to_string(),
            port,
            parameters,
        })
    }
}
