//! In-process collaborators shared by the kernel integration tests.
//!
//! `MockContainer` records every call the service makes and hands out
//! `MockClient`s that remember how they were started and stopped. Nothing
//! here touches the network.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetcomm_types::{Agent, Endpoint, FleetError, FleetResult};
use fleetcomm_wire::{
    AgentDirectory, ConcurrencyManager, ContainerMetrics, DiscoveryListener, InvocationHandler,
    OutboundClient, SenderConfig, ServiceContainer, WireError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Mock client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingBehaviour {
    Succeed,
    Fail,
    Hang,
}

pub struct MockClient {
    uri: String,
    pub config: SenderConfig,
    sending: AtomicBool,
    pub starts: AtomicUsize,
    /// `preserve_backlog` of every stop call, in order.
    pub stops: Mutex<Vec<bool>>,
    ping: PingBehaviour,
    /// When set, `stop_sending` records the call and then waits here.
    stop_gate: Option<Arc<tokio::sync::Notify>>,
}

impl MockClient {
    pub fn stop_calls(&self) -> Vec<bool> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundClient for MockClient {
    fn remote_uri(&self) -> &str {
        &self.uri
    }

    async fn start_sending(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.sending.store(true, Ordering::SeqCst);
    }

    async fn stop_sending(&self, preserve_backlog: bool) {
        self.stops.lock().unwrap().push(preserve_backlog);
        if let Some(gate) = &self.stop_gate {
            gate.notified().await;
        }
        self.sending.store(false, Ordering::SeqCst);
    }

    fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    async fn ping(&self, _timeout: Duration) -> Result<(), WireError> {
        match self.ping {
            PingBehaviour::Succeed => Ok(()),
            PingBehaviour::Fail => Err(WireError::ConnectFailed {
                uri: self.uri.clone(),
                reason: "connection refused".into(),
            }),
            PingBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mock container
// ---------------------------------------------------------------------------

pub struct MockContainer {
    pub starts: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_handler_removal: AtomicBool,
    pub ping: Mutex<PingBehaviour>,
    /// Handed to every client created afterwards.
    pub stop_gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    pub started_with: Mutex<Option<BTreeMap<String, String>>>,
    pub clients: Mutex<Vec<Arc<MockClient>>>,
    pub listeners: Mutex<Vec<Arc<dyn DiscoveryListener>>>,
    pub handlers: Mutex<HashMap<String, Arc<dyn InvocationHandler>>>,
    pub manager: RwLock<Arc<ConcurrencyManager>>,
    pub manager_swaps: AtomicUsize,
    pub metrics: Mutex<ContainerMetrics>,
    running: AtomicBool,
}

impl Default for MockContainer {
    fn default() -> Self {
        Self {
            starts: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_handler_removal: AtomicBool::new(false),
            ping: Mutex::new(PingBehaviour::Succeed),
            stop_gate: Mutex::new(None),
            started_with: Mutex::new(None),
            clients: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            manager: RwLock::new(Arc::new(ConcurrencyManager::unlimited())),
            manager_swaps: AtomicUsize::new(0),
            metrics: Mutex::new(ContainerMetrics::default()),
            running: AtomicBool::new(false),
        }
    }
}

impl MockContainer {
    pub fn created(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn created_uris(&self) -> Vec<String> {
        self.created().iter().map(|c| c.remote_uri().to_string()).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn online(&self, endpoint: &Endpoint) {
        for l in self.listeners.lock().unwrap().iter() {
            l.on_endpoint_online(endpoint);
        }
    }

    pub fn offline(&self, endpoint: &Endpoint) {
        for l in self.listeners.lock().unwrap().iter() {
            l.on_endpoint_offline(endpoint);
        }
    }

    pub fn current_manager(&self) -> Arc<ConcurrencyManager> {
        self.manager.read().unwrap().clone()
    }
}

#[async_trait]
impl ServiceContainer for MockContainer {
    async fn start(
        &self,
        preferences: &BTreeMap<String, String>,
        _sender_defaults: &SenderConfig,
    ) -> Result<(), WireError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(WireError::Container("address already in use".into()));
        }
        *self.started_with.lock().unwrap() = Some(preferences.clone());
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn server_endpoint(&self) -> Option<String> {
        self.running
            .load(Ordering::SeqCst)
            .then(|| "socket://10.0.0.5:7080/".to_string())
    }

    fn create_client_sender(
        &self,
        uri: &str,
        config: &SenderConfig,
    ) -> Result<Arc<dyn OutboundClient>, WireError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(WireError::Container("sender pool exhausted".into()));
        }
        let client = Arc::new(MockClient {
            uri: uri.to_string(),
            config: config.clone(),
            sending: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: Mutex::new(Vec::new()),
            ping: *self.ping.lock().unwrap(),
            stop_gate: self.stop_gate.lock().unwrap().clone(),
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }

    fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn add_invocation_handler(&self, subsystem: &str, handler: Arc<dyn InvocationHandler>) {
        self.handlers
            .lock()
            .unwrap()
            .insert(subsystem.to_string(), handler);
    }

    fn remove_invocation_handler(&self, subsystem: &str) -> Result<(), WireError> {
        if self.fail_handler_removal.load(Ordering::SeqCst) {
            return Err(WireError::Container("handler busy".into()));
        }
        self.handlers
            .lock()
            .unwrap()
            .remove(subsystem)
            .map(|_| ())
            .ok_or_else(|| WireError::UnknownSubsystem(subsystem.to_string()))
    }

    fn concurrency_manager(&self) -> Arc<ConcurrencyManager> {
        self.current_manager()
    }

    fn set_concurrency_manager(&self, manager: Arc<ConcurrencyManager>) {
        self.manager_swaps.fetch_add(1, Ordering::SeqCst);
        *self.manager.write().unwrap() = manager;
    }

    fn metrics(&self) -> ContainerMetrics {
        self.metrics.lock().unwrap().clone()
    }

    fn clear_metrics(&self) {
        *self.metrics.lock().unwrap() = ContainerMetrics::default();
    }
}

// ---------------------------------------------------------------------------
// Mock directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDirectory {
    pub agents: Mutex<HashMap<String, Agent>>,
    pub lookups: AtomicUsize,
    pub alive: Mutex<Vec<String>>,
}

impl MockDirectory {
    pub fn with_agent(agent: Agent) -> Self {
        let dir = Self::default();
        dir.agents
            .lock()
            .unwrap()
            .insert(agent.token.clone(), agent);
        dir
    }
}

#[async_trait]
impl AgentDirectory for MockDirectory {
    async fn find_agent_by_token(&self, token: &str) -> FleetResult<Option<Agent>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if token == "explode" {
            return Err(FleetError::Directory("connection reset".into()));
        }
        Ok(self.agents.lock().unwrap().get(token).cloned())
    }

    async fn mark_alive(&self, agent: &Agent) -> FleetResult<()> {
        self.alive.lock().unwrap().push(agent.name.clone());
        Ok(())
    }
}
