//! Discovery listener that feeds the agent registry.

use crate::registry::AgentRegistry;
use fleetcomm_types::Endpoint;
use tracing::{debug, info};

/// Receives endpoint online/offline events from the transport container.
pub trait DiscoveryListener: Send + Sync + 'static {
    fn on_endpoint_online(&self, endpoint: &Endpoint);
    fn on_endpoint_offline(&self, endpoint: &Endpoint);
}

/// Forwards discovery events into an [`AgentRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryDiscoveryListener {
    registry: AgentRegistry,
}

impl RegistryDiscoveryListener {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }
}

impl DiscoveryListener for RegistryDiscoveryListener {
    fn on_endpoint_online(&self, endpoint: &Endpoint) {
        if self.registry.add(endpoint.clone()) {
            info!(endpoint = %endpoint, "Agent endpoint came online");
        } else {
            debug!(endpoint = %endpoint, "Non-agent endpoint came online");
        }
    }

    fn on_endpoint_offline(&self, endpoint: &Endpoint) {
        if self.registry.remove(endpoint) {
            info!(endpoint = %endpoint, "Agent endpoint went offline");
        }
    }
}
