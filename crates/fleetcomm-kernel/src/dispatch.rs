//! Inbound command dispatch: authenticate, admit, handle.

use crate::auth::CommandAuthenticator;
use async_trait::async_trait;
use fleetcomm_types::{CommandResponse, FleetResult, InboundCommand};
use fleetcomm_wire::{InvocationHandler, RpcCategory, ServiceContainer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The business logic behind an invocation subsystem.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, command: InboundCommand) -> FleetResult<serde_json::Value>;
}

/// Which admission category a command falls into.
///
/// Keys are either `Interface` or `Interface.method`; the method-specific
/// entry wins when both exist.
#[derive(Debug, Clone, Default)]
pub struct CategoryMap {
    entries: HashMap<String, RpcCategory>,
}

impl CategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, category: RpcCategory) -> Self {
        self.entries.insert(key.into(), category);
        self
    }

    pub fn category_of(&self, command: &InboundCommand) -> Option<RpcCategory> {
        let interface = command.target_interface.as_deref()?;
        if let Some(method) = command.method.as_deref() {
            if let Some(c) = self.entries.get(&format!("{interface}.{method}")) {
                return Some(*c);
            }
        }
        self.entries.get(interface).copied()
    }

    /// The agent-facing server services and the category each report lands in.
    pub fn agent_services() -> Self {
        Self::new()
            .with(
                "DiscoveryServerService.mergeInventoryReport",
                RpcCategory::InventoryReport,
            )
            .with(
                "DiscoveryServerService.mergeAvailabilityReport",
                RpcCategory::AvailabilityReport,
            )
            .with(
                "DiscoveryServerService.getResourceSyncInfo",
                RpcCategory::InventorySync,
            )
            .with(
                "ContentServerService.mergeDiscoveredPackages",
                RpcCategory::ContentReport,
            )
            .with(
                "ContentServerService.downloadPackageBits",
                RpcCategory::ContentDownload,
            )
            .with(
                "MeasurementServerService.mergeMeasurementReport",
                RpcCategory::MeasurementReport,
            )
            .with(
                "MeasurementServerService.getLatestSchedulesForResourceId",
                RpcCategory::MeasurementScheduleRequest,
            )
            .with("ConfigurationServerService", RpcCategory::ConfigurationUpdate)
    }
}

/// Installed in the container as the invocation handler of a subsystem.
pub struct CommandDispatcher {
    authenticator: Arc<CommandAuthenticator>,
    container: Arc<dyn ServiceContainer>,
    categories: CategoryMap,
    handler: Arc<dyn CommandHandler>,
}

impl CommandDispatcher {
    pub fn new(
        authenticator: Arc<CommandAuthenticator>,
        container: Arc<dyn ServiceContainer>,
        categories: CategoryMap,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            authenticator,
            container,
            categories,
            handler,
        }
    }

    pub async fn dispatch(&self, command: InboundCommand) -> CommandResponse {
        if !self.authenticator.is_authenticated(&command).await {
            return CommandResponse::Rejected {
                reason: "Command failed authentication".to_string(),
            };
        }

        let category = self.categories.category_of(&command);
        // Held until the handler returns.
        let limiter = self.container.concurrency_manager();
        let _permit = match limiter.try_admit(category.map(|c| c.as_str())) {
            Ok(permit) => permit,
            Err(e) => {
                debug!(category = ?category, error = %e, "Command not admitted");
                return CommandResponse::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        match self.handler.handle(command).await {
            Ok(result) => CommandResponse::Success { result },
            Err(e) => {
                warn!(error = %e, "Command handler failed");
                CommandResponse::Failure {
                    message: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl InvocationHandler for CommandDispatcher {
    async fn invoke(&self, command: InboundCommand) -> CommandResponse {
        self.dispatch(command).await
    }
}
