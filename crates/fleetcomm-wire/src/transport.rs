//! Transport container seam.
//!
//! The connection container (socket acceptor, RPC marshalling, outbound
//! sender machinery) lives outside this workspace. The server core talks to
//! it through the [`ServiceContainer`] and [`OutboundClient`] traits and
//! receives inbound RPCs through [`InvocationHandler`]s it installs.

use crate::concurrency::ConcurrencyManager;
use crate::discovery::DiscoveryListener;
use crate::sender::SenderConfig;
use async_trait::async_trait;
use fleetcomm_types::{CommandResponse, FleetError, InboundCommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot connect to {uri}: {reason}")]
    ConnectFailed { uri: String, reason: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Sender is not sending")]
    NotSending,
    #[error("Container error: {0}")]
    Container(String),
    #[error("Concurrency limit '{0}' reached")]
    LimitReached(String),
    #[error("Concurrency limit '{0}' is closed")]
    LimitClosed(String),
    #[error("No invocation handler for subsystem '{0}'")]
    UnknownSubsystem(String),
}

impl From<WireError> for FleetError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) => FleetError::Io(io),
            other => FleetError::Transport(other.to_string()),
        }
    }
}

/// An outbound RPC sender bound to one remote endpoint.
#[async_trait]
pub trait OutboundClient: Send + Sync + 'static {
    /// Locator URI this client dials.
    fn remote_uri(&self) -> &str;

    /// Begin sending. Any spooled guaranteed-delivery backlog starts draining.
    async fn start_sending(&self);

    /// Stop sending and wait until the client is fully stopped.
    ///
    /// With `preserve_backlog`, queued guaranteed-delivery requests are
    /// spooled to disk and later requests spool instead of being sent.
    /// Without it, queued requests are discarded.
    async fn stop_sending(&self, preserve_backlog: bool);

    /// Whether the client is currently sending.
    fn is_sending(&self) -> bool;

    /// Round-trip a ping to the remote endpoint.
    async fn ping(&self, timeout: Duration) -> Result<(), WireError>;
}

/// Handles inbound RPCs for one subsystem.
#[async_trait]
pub trait InvocationHandler: Send + Sync + 'static {
    async fn invoke(&self, command: InboundCommand) -> CommandResponse;
}

/// Timing of one remote call site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallTime {
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub total_ms: u64,
}

impl CallTime {
    pub fn average_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ms / self.count
        }
    }
}

/// Counters exposed by the container for received RPCs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub dropped_commands_received: u64,
    pub not_processed_commands_received: u64,
    pub failed_commands_received: u64,
    pub successful_commands_received: u64,
    pub total_commands_received: u64,
    pub average_execution_time_received_ms: u64,
    pub call_time_received: BTreeMap<String, CallTime>,
}

/// The transport/connection container.
#[async_trait]
pub trait ServiceContainer: Send + Sync + 'static {
    /// Start accepting connections with the given preferences.
    async fn start(
        &self,
        preferences: &BTreeMap<String, String>,
        sender_defaults: &SenderConfig,
    ) -> Result<(), WireError>;

    /// Stop accepting connections and release transport resources.
    async fn shutdown(&self);

    /// Locator URI of the running server endpoint, if started.
    fn server_endpoint(&self) -> Option<String>;

    /// Build an outbound client. Does not connect; connection failures
    /// surface from the client's own calls.
    fn create_client_sender(
        &self,
        uri: &str,
        config: &SenderConfig,
    ) -> Result<Arc<dyn OutboundClient>, WireError>;

    fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>);

    fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>);

    fn add_invocation_handler(&self, subsystem: &str, handler: Arc<dyn InvocationHandler>);

    fn remove_invocation_handler(&self, subsystem: &str) -> Result<(), WireError>;

    /// The limiter snapshot currently used to admit inbound RPCs.
    fn concurrency_manager(&self) -> Arc<ConcurrencyManager>;

    /// Swap in a new limiter snapshot.
    fn set_concurrency_manager(&self, manager: Arc<ConcurrencyManager>);

    fn metrics(&self) -> ContainerMetrics;

    fn clear_metrics(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_time_average() {
        let ct = CallTime {
            count: 4,
            min_ms: 1,
            max_ms: 10,
            total_ms: 20,
        };
        assert_eq!(ct.average_ms(), 5);
        assert_eq!(CallTime::default().average_ms(), 0);
    }

    #[test]
    fn test_wire_error_into_fleet_error() {
        let e: FleetError = WireError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(e, FleetError::Transport(_)));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let e: FleetError = WireError::Io(io).into();
        assert!(matches!(e, FleetError::Io(_)));
    }
}
