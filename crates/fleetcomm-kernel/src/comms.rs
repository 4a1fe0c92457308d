//! The server communications service.
//!
//! Owns the agent registry, the outbound client cache and the concurrency
//! limits, and drives the transport container through start and stop.

use crate::client_cache::OutboundClientCache;
use crate::concurrency::ConcurrencyLimitRegistry;
use crate::config::{self, expand_vars, ServerConfig, ServerIdentity};
use crate::error::{KernelError, KernelResult};
use crate::preferences::PreferencesStore;
use crate::properties::PropertiesFile;
use fleetcomm_types::endpoint::{AGENT_ENDPOINT_TYPE, ENDPOINT_TYPE_PARAMETER};
use fleetcomm_types::{Agent, Endpoint, FleetResult};
use fleetcomm_wire::{
    AgentRegistry, ContainerMetrics, DiscoveryListener, InvocationHandler, OutboundClient,
    RegistryDiscoveryListener, RpcCategory, ServiceContainer, GLOBAL_LIMIT_NAME,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Subsystem under which the remote API handler is installed.
pub const REMOTE_API_SUBSYSTEM: &str = "REMOTEAPI";

/// Default configuration file location.
pub const DEFAULT_CONFIG_FILE: &str = "server-comm-configuration.toml";

/// Server property holding the maintenance-mode-at-startup flag.
pub const MAINTENANCE_MODE_AT_START: &str = "fleetcomm.server.maintenance-mode-at-start";

static MAINTENANCE_MODE_AT_START_FLAG: AtomicBool = AtomicBool::new(false);

/// Process-wide view of the maintenance-mode-at-startup flag.
pub fn maintenance_mode_flag() -> bool {
    MAINTENANCE_MODE_AT_START_FLAG.load(Ordering::SeqCst)
}

/// Where the service reads its configuration from on each start.
#[derive(Debug, Clone)]
pub struct CommsSettings {
    pub config_file: PathBuf,
    /// Optional `key=value` file of overrides, applied before `overrides`.
    pub overrides_file: Option<PathBuf>,
    pub overrides: BTreeMap<String, String>,
    /// This server's directory entry, used for bind defaults.
    pub identity: Option<ServerIdentity>,
}

impl CommsSettings {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            overrides_file: None,
            overrides: BTreeMap::new(),
            identity: None,
        }
    }
}

impl Default for CommsSettings {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }
}

pub struct CommunicationsService {
    container: Arc<dyn ServiceContainer>,
    registry: AgentRegistry,
    clients: OutboundClientCache,
    prefs: Arc<PreferencesStore>,
    properties: PropertiesFile,
    limits: ConcurrencyLimitRegistry,
    settings: RwLock<CommsSettings>,
    discovery: Arc<dyn DiscoveryListener>,
    remote_api: Option<Arc<dyn InvocationHandler>>,
    lifecycle: tokio::sync::Mutex<()>,
    started: AtomicBool,
}

impl CommunicationsService {
    pub fn new(
        container: Arc<dyn ServiceContainer>,
        prefs: Arc<PreferencesStore>,
        properties: PropertiesFile,
        settings: CommsSettings,
    ) -> Self {
        let registry = AgentRegistry::new();
        let discovery: Arc<dyn DiscoveryListener> =
            Arc::new(RegistryDiscoveryListener::new(registry.clone()));
        let limits =
            ConcurrencyLimitRegistry::new(container.clone(), properties.clone(), prefs.clone());
        Self {
            container,
            registry,
            clients: OutboundClientCache::new(),
            prefs,
            properties,
            limits,
            settings: RwLock::new(settings),
            discovery,
            remote_api: None,
            lifecycle: tokio::sync::Mutex::new(()),
            started: AtomicBool::new(false),
        }
    }

    /// Install `handler` under [`REMOTE_API_SUBSYSTEM`] on every start.
    pub fn with_remote_api_handler(mut self, handler: Arc<dyn InvocationHandler>) -> Self {
        self.remote_api = Some(handler);
        self
    }

    pub fn container(&self) -> &Arc<dyn ServiceContainer> {
        &self.container
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn client_cache(&self) -> &OutboundClientCache {
        &self.clients
    }

    // ---- Lifecycle ----

    /// Start the communications services. A no-op when already started.
    ///
    /// The configuration is always reloaded from the configuration file, so
    /// preferences persisted by an earlier run are not reused.
    pub async fn start(&self) -> KernelResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.started.load(Ordering::SeqCst) {
            debug!("Communications services already started");
            return Ok(());
        }

        info!("Starting communications services");
        let previous = self.prefs.snapshot();
        let config = self.reload_configuration()?;

        self.container.add_discovery_listener(self.discovery.clone());
        if let Err(e) = self
            .container
            .start(config.preferences(), &config.sender_config())
            .await
        {
            self.container.remove_discovery_listener(&self.discovery);
            self.publish_preferences(previous);
            error!(error = %e, "Transport container failed to start");
            return Err(KernelError::StartFailed(e.to_string()));
        }
        self.limits.reset(config.concurrency_limits());

        if let Some(handler) = &self.remote_api {
            self.container
                .add_invocation_handler(REMOTE_API_SUBSYSTEM, handler.clone());
        }

        self.started.store(true, Ordering::SeqCst);
        info!(
            endpoint = ?self.container.server_endpoint(),
            "Communications services started"
        );
        Ok(())
    }

    /// Stop the communications services. A no-op when not started.
    ///
    /// Every cached client is stopped with its guaranteed-delivery backlog
    /// preserved, then the cache is emptied.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.started.swap(false, Ordering::SeqCst) {
            if self.remote_api.is_some() {
                if let Err(e) = self.container.remove_invocation_handler(REMOTE_API_SUBSYSTEM) {
                    warn!(error = %e, "Failed to remove the remote API handler");
                }
            }
            self.container.remove_discovery_listener(&self.discovery);
            self.container.shutdown().await;
            info!("Communications services stopped");
        }

        let clients = self.clients.drain();
        if !clients.is_empty() {
            futures::future::join_all(clients.iter().map(|(_, c)| c.stop_sending(true))).await;
            debug!(count = clients.len(), "Stopped cached agent clients");
        }
    }

    /// Stop and forget every known agent.
    pub async fn dispose(&self) {
        self.stop().await;
        self.registry.clear();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Locator of the running server endpoint, if started.
    pub fn started_server_endpoint(&self) -> Option<String> {
        if self.is_started() {
            self.container.server_endpoint()
        } else {
            None
        }
    }

    // ---- Configuration ----

    fn settings(&self) -> CommsSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update_settings(&self, f: impl FnOnce(&mut CommsSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        f(&mut settings);
    }

    pub fn config_file(&self) -> PathBuf {
        self.settings().config_file
    }

    /// Set the configuration file location. `${VAR}` references are expanded.
    pub fn set_config_file(&self, location: &str) {
        let path = PathBuf::from(expand_vars(location));
        debug!(path = %path.display(), "Configuration file location changed");
        self.update_settings(|s| s.config_file = path);
    }

    pub fn overrides_file(&self) -> Option<PathBuf> {
        self.settings().overrides_file
    }

    pub fn set_overrides_file(&self, path: Option<&Path>) {
        let path = path.map(Path::to_path_buf);
        self.update_settings(|s| s.overrides_file = path);
    }

    pub fn overrides(&self) -> BTreeMap<String, String> {
        self.settings().overrides
    }

    pub fn set_overrides(&self, overrides: BTreeMap<String, String>) {
        self.update_settings(|s| s.overrides = overrides);
    }

    /// The current configuration view.
    pub fn configuration(&self) -> ServerConfig {
        ServerConfig::new(self.prefs.snapshot())
    }

    /// Prepare the preferences again from the configuration file and
    /// overrides.
    ///
    /// The new node is built on a scratch store and published in one swap,
    /// so readers see either the previous preferences or the new ones. On
    /// failure the previous preferences stay in place.
    pub fn reload_configuration(&self) -> KernelResult<ServerConfig> {
        let settings = self.settings();
        let overrides = config::collect_overrides(
            settings.overrides_file.as_deref(),
            &settings.overrides,
            &self.properties,
        )?;

        let scratch = PreferencesStore::in_memory(self.prefs.node_name());
        let config = config::prepare_preferences(
            &scratch,
            &settings.config_file,
            &overrides,
            settings.identity.as_ref(),
        )
        .map_err(|e| {
            error!(error = %e, "Failed to reload configuration");
            e
        })?;

        let previous = self.prefs.snapshot();
        self.prefs.replace(config.preferences().clone());
        if let Err(e) = self.prefs.flush() {
            self.prefs.replace(previous);
            error!(error = %e, "Failed to save reloaded configuration");
            return Err(e);
        }
        Ok(config)
    }

    /// Put `values` back as the preferences node. A failed save is logged.
    fn publish_preferences(&self, values: BTreeMap<String, String>) {
        self.prefs.replace(values);
        if let Err(e) = self.prefs.flush() {
            warn!(error = %e, "Failed to save restored preferences");
        }
    }

    // ---- Agent clients ----

    /// Live agent endpoints, as a snapshot.
    pub fn known_agents(&self) -> Vec<Endpoint> {
        self.registry.list()
    }

    fn resolve_uri(&self, agent: &Agent) -> String {
        if let Some(endpoint) = self.registry.get(&agent.address, agent.port) {
            return endpoint.uri();
        }
        agent
            .remote_endpoint
            .clone()
            .unwrap_or_else(|| agent.default_uri())
    }

    /// The cached client for `agent`, created if absent or built for an
    /// earlier token of the agent.
    pub async fn get_client(&self, agent: &Agent) -> FleetResult<Arc<dyn OutboundClient>> {
        let key = agent.endpoint_key();
        let uri = self.resolve_uri(agent);
        let lookup = {
            let _key_guard = self.clients.lock_key(&key).await;
            self.clients.get_or_create(key, &agent.token, || {
                let sender = self.configuration().sender_config().for_agent(&agent.name);
                self.container.create_client_sender(&uri, &sender)
            })?
        };

        if let Some(stale) = lookup.replaced {
            info!(agent = %agent.name, "Agent token changed, replacing cached client");
            stale.stop_sending(true).await;
        }
        if lookup.created {
            debug!(agent = %agent.name, endpoint = %uri, "Created agent client");
        }
        Ok(lookup.client)
    }

    /// Stop and forget the agent's client and purge its spool file.
    ///
    /// Lookups of the same agent wait until the spool file is gone, so a
    /// new client never starts on a file that is about to be deleted.
    pub async fn destroy_client(&self, agent: &Agent) {
        let key = agent.endpoint_key();
        let _key_guard = self.clients.lock_key(&key).await;

        if let Some(client) = self.clients.remove(&key) {
            client.stop_sending(false).await;
        }

        let sender = self.configuration().sender_config().for_agent(&agent.name);
        if let Some(spool) = sender.spool_file_path() {
            if let Err(e) = purge_spool_file(&spool).await {
                warn!(
                    agent = %agent.name,
                    path = %spool.display(),
                    error = %e,
                    "Failed to truncate/delete spool file of deleted agent, remove it manually"
                );
            }
        }
    }

    /// Register an agent that announced itself and start its client so any
    /// spooled backlog begins draining.
    pub async fn add_started_agent(&self, agent: &Agent) -> FleetResult<()> {
        let declared = agent
            .remote_endpoint
            .clone()
            .unwrap_or_else(|| agent.default_uri());
        let mut endpoint = Endpoint::parse(&declared)?;
        if !endpoint.is_agent() {
            endpoint = endpoint.with_parameter(ENDPOINT_TYPE_PARAMETER, AGENT_ENDPOINT_TYPE);
        }
        self.registry.add(endpoint);

        let client = self.get_client(agent).await?;
        client.start_sending().await;
        info!(agent = %agent.name, endpoint = %declared, "Agent started");
        Ok(())
    }

    /// Forget an agent that went down. Its client stops, so later
    /// guaranteed-delivery requests spool instead of being sent.
    pub async fn remove_downed_agent(&self, endpoint: &str) -> FleetResult<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.registry.remove(&endpoint);

        let key = endpoint.key();
        let _key_guard = self.clients.lock_key(&key).await;
        if let Some(client) = self.clients.remove(&key) {
            client.stop_sending(true).await;
        }
        info!(endpoint = %endpoint, "Agent went down");
        Ok(())
    }

    /// Probe connectivity to `endpoint`. Any failure is `false`.
    pub async fn ping_endpoint(&self, endpoint: &str, timeout_ms: u64) -> bool {
        let config = self.configuration().sender_config().for_probe();
        let client = match self.container.create_client_sender(endpoint, &config) {
            Ok(client) => client,
            Err(e) => {
                debug!(endpoint, error = %e, "Ping failed");
                return false;
            }
        };

        client.start_sending().await;
        let timeout = Duration::from_millis(timeout_ms);
        let outcome = tokio::time::timeout(timeout, client.ping(timeout)).await;
        client.stop_sending(false).await;

        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(endpoint, error = %e, "Ping failed");
                false
            }
            Err(_) => {
                debug!(endpoint, timeout_ms, "Ping timed out");
                false
            }
        }
    }

    // ---- Concurrency limits ----

    pub fn concurrency_limit(&self, name: &str) -> Option<i32> {
        self.limits.get(name)
    }

    pub fn concurrency_limits(&self) -> BTreeMap<String, i32> {
        self.limits.all()
    }

    /// Persist and apply a limit. `None` means unlimited.
    pub fn set_concurrency_limit(&self, name: &str, value: Option<i32>) -> KernelResult<()> {
        self.limits.set(name, value, true)
    }

    pub fn global_concurrency_limit(&self) -> Option<i32> {
        self.concurrency_limit(GLOBAL_LIMIT_NAME)
    }

    pub fn set_global_concurrency_limit(&self, value: Option<i32>) -> KernelResult<()> {
        self.set_concurrency_limit(GLOBAL_LIMIT_NAME, value)
    }

    pub fn category_concurrency_limit(&self, category: RpcCategory) -> Option<i32> {
        self.concurrency_limit(category.as_str())
    }

    pub fn set_category_concurrency_limit(
        &self,
        category: RpcCategory,
        value: Option<i32>,
    ) -> KernelResult<()> {
        self.set_concurrency_limit(category.as_str(), value)
    }

    // ---- Maintenance mode ----

    /// Read the flag from the server properties file, falling back to the
    /// process-wide flag when the file cannot be read.
    pub fn maintenance_mode_at_startup(&self) -> bool {
        if !self.properties.path().is_file() {
            error!(
                path = %self.properties.path().display(),
                "Server properties file missing, using the process-wide maintenance mode flag"
            );
            return maintenance_mode_flag();
        }
        match self.properties.get(MAINTENANCE_MODE_AT_START) {
            Ok(value) => value
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            Err(e) => {
                error!(error = %e, "Cannot read maintenance mode property, using the process-wide flag");
                maintenance_mode_flag()
            }
        }
    }

    /// Persist the flag, then mirror it process-wide. `None` means `false`.
    pub fn set_maintenance_mode_at_startup(&self, flag: Option<bool>) -> KernelResult<()> {
        let flag = flag.unwrap_or(false);
        self.properties
            .update(MAINTENANCE_MODE_AT_START, &flag.to_string())?;
        MAINTENANCE_MODE_AT_START_FLAG.store(flag, Ordering::SeqCst);
        info!(flag, "Maintenance mode at startup changed");
        Ok(())
    }

    // ---- Metrics ----

    pub fn metrics(&self) -> ContainerMetrics {
        self.container.metrics()
    }

    pub fn clear_metrics(&self) {
        self.container.clear_metrics();
    }
}

/// Truncate first, since some platforms refuse to delete an open file.
async fn purge_spool_file(path: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(path).await.is_err() {
        return Ok(());
    }
    tokio::fs::File::create(path).await?;
    tokio::fs::remove_file(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_missing_spool_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(purge_spool_file(&dir.path().join("nope.dat")).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_removes_spool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_cmd.dat");
        std::fs::write(&path, b"queued").unwrap();
        purge_spool_file(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_settings_default_config_file() {
        let settings = CommsSettings::default();
        assert_eq!(settings.config_file, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(settings.overrides.is_empty());
    }
}
