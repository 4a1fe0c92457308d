//! Agent directory seam.

use async_trait::async_trait;
use fleetcomm_types::{Agent, FleetResult};

/// The authoritative store of registered agents and their security tokens.
#[async_trait]
pub trait AgentDirectory: Send + Sync + 'static {
    /// Find the agent that owns `token`. `Ok(None)` when no agent does.
    async fn find_agent_by_token(&self, token: &str) -> FleetResult<Option<Agent>>;

    /// Record that `agent` was just heard from.
    async fn mark_alive(&self, agent: &Agent) -> FleetResult<()>;
}
