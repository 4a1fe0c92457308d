//! Agents as known to the agent directory.

use crate::endpoint::{Endpoint, EndpointKey, DEFAULT_PROTOCOL};
use serde::{Deserialize, Serialize};

/// A remote managed agent, as recorded in the agent directory.
///
/// The communications core does not own agents; it only derives endpoint
/// identity and connection details from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent name. Also used to derive per-agent spool file names.
    pub name: String,
    /// Address the agent registered with.
    pub address: String,
    /// Port the agent listens on.
    pub port: u16,
    /// Current security token. Rotated when the agent re-registers.
    pub token: String,
    /// The agent's last declared locator URI, if it announced one.
    #[serde(default)]
    pub remote_endpoint: Option<String>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            token: token.into(),
            remote_endpoint: None,
        }
    }

    /// Builder-style helper to set the declared locator URI.
    pub fn with_remote_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.remote_endpoint = Some(uri.into());
        self
    }

    /// The cache/registry identity for this agent.
    pub fn endpoint_key(&self) -> EndpointKey {
        EndpointKey::new(self.address.clone(), self.port)
    }

    /// Locator URI built from address and port alone.
    pub fn default_uri(&self) -> String {
        Endpoint::new(DEFAULT_PROTOCOL, self.address.clone(), self.port).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_key_from_address() {
        let agent = Agent::new("agent-a", "192.168.1.20", 16163, "tok");
        assert_eq!(agent.endpoint_key().to_string(), "192.168.1.20:16163");
    }

    #[test]
    fn test_default_uri() {
        let agent = Agent::new("agent-a", "host-a", 16163, "tok");
        assert_eq!(agent.default_uri(), "socket://host-a:16163/");
    }
}
