//! Agent registry. Tracks which endpoints currently belong to live agents.
//!
//! The [`AgentRegistry`] is a thread-safe map from `host:port` to the last
//! [`Endpoint`] observed at that address. It is fed by the discovery listener
//! and by explicit agent start/down notifications, and consulted when an
//! outbound connection to an agent is built.

use fleetcomm_types::{Endpoint, EndpointKey, FleetResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Thread-safe registry of known agent endpoints.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<EndpointKey, Endpoint>>>,
}

impl AgentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record an agent endpoint.
    ///
    /// Endpoints without the agent tag are not stored and `false` is
    /// returned. An existing entry with the same host and port is replaced
    /// even when protocol or parameters differ.
    pub fn add(&self, endpoint: Endpoint) -> bool {
        if !endpoint.is_agent() {
            debug!(endpoint = %endpoint, "Ignoring non-agent endpoint");
            return false;
        }
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents.insert(endpoint.key(), endpoint);
        true
    }

    /// Parse a locator URI and record it. See [`AgentRegistry::add`].
    pub fn add_uri(&self, uri: &str) -> FleetResult<bool> {
        Ok(self.add(Endpoint::parse(uri)?))
    }

    /// Remove the entry at the endpoint's host and port.
    ///
    /// Returns whether an entry was present.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents.remove(&endpoint.key()).is_some()
    }

    /// Remove by locator URI. A malformed URI is an error, not a miss.
    pub fn remove_uri(&self, uri: &str) -> FleetResult<bool> {
        let endpoint = Endpoint::parse(uri)?;
        Ok(self.remove(&endpoint))
    }

    /// Look up an agent endpoint. The host is matched exactly.
    pub fn get(&self, host: &str, port: u16) -> Option<Endpoint> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(&EndpointKey::new(host, port)).cloned()
    }

    /// Snapshot of all known agent endpoints.
    pub fn list(&self) -> Vec<Endpoint> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.values().cloned().collect()
    }

    /// Forget every agent.
    pub fn clear(&self) {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents.clear();
    }

    /// Number of known agents.
    pub fn len(&self) -> usize {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
