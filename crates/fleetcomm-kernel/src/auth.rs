//! Security-token authentication of inbound commands.
//!
//! Validated tokens are cached with the time they were last confirmed by the
//! agent directory. Within the TTL a token is accepted without a directory
//! round-trip; past it the next request revalidates, and a failed
//! revalidation evicts the token.

use dashmap::DashMap;
use fleetcomm_types::command::REMOTE_POJO_COMMAND_TYPE;
use fleetcomm_types::{Agent, InboundCommand};
use fleetcomm_wire::AgentDirectory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a validated token is trusted before it is checked again.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single directory lookup.
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_secs(30);

/// Interface exposing the calls an agent makes before it has a token.
pub const CORE_SERVER_INTERFACE: &str = "CoreServerService";

const BOOTSTRAP_METHODS: &[&str] = &["registerAgent", "getPublicAgentUpdateEndpoint"];

/// Wall-clock source in milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Concurrent `token -> last validated (millis)` cache.
pub struct SecurityTokenCache {
    entries: DashMap<String, i64>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SecurityTokenCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `token` was validated no more than one TTL ago.
    pub fn is_fresh(&self, token: &str) -> bool {
        let Some(last) = self.entries.get(token).map(|e| *e) else {
            return false;
        };
        let age = self.clock.now_millis().saturating_sub(last);
        age <= self.ttl.as_millis() as i64
    }

    /// Record a successful validation at the current time.
    pub fn record(&self, token: &str) {
        self.entries
            .insert(token.to_string(), self.clock.now_millis());
    }

    pub fn remove(&self, token: &str) -> bool {
        self.entries.remove(token).is_some()
    }

    pub fn last_validated(&self, token: &str) -> Option<i64> {
        self.entries.get(token).map(|e| *e)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SecurityTokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL, Arc::new(SystemClock))
    }
}

/// Whether a token-less command is one of the agent bootstrap calls.
pub fn is_bootstrap_call(command: &InboundCommand) -> bool {
    command.command_type == REMOTE_POJO_COMMAND_TYPE
        && command.target_interface.as_deref() == Some(CORE_SERVER_INTERFACE)
        && command
            .method
            .as_deref()
            .is_some_and(|m| BOOTSTRAP_METHODS.contains(&m))
}

pub struct CommandAuthenticator {
    directory: Arc<dyn AgentDirectory>,
    cache: SecurityTokenCache,
    lookup_timeout: Duration,
}

impl CommandAuthenticator {
    pub fn new(directory: Arc<dyn AgentDirectory>) -> Self {
        Self::with_cache(directory, SecurityTokenCache::default())
    }

    pub fn with_cache(directory: Arc<dyn AgentDirectory>, cache: SecurityTokenCache) -> Self {
        Self {
            directory,
            cache,
            lookup_timeout: DEFAULT_DIRECTORY_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &SecurityTokenCache {
        &self.cache
    }

    /// Authenticate an inbound command. Never errors; failures are `false`.
    pub async fn is_authenticated(&self, command: &InboundCommand) -> bool {
        let Some(token) = command.security_token() else {
            let allowed = is_bootstrap_call(command);
            if !allowed {
                debug!(
                    command_type = %command.command_type,
                    interface = ?command.target_interface,
                    method = ?command.method,
                    "Rejecting command without a security token"
                );
            }
            return allowed;
        };

        if self.cache.is_fresh(token) {
            return true;
        }

        match self.lookup(token).await {
            Some(agent) => {
                self.cache.record(token);
                if let Err(e) = self.directory.mark_alive(&agent).await {
                    warn!(agent = %agent.name, error = %e, "Failed to mark agent alive");
                }
                true
            }
            None => {
                self.cache.remove(token);
                false
            }
        }
    }

    async fn lookup(&self, token: &str) -> Option<Agent> {
        match tokio::time::timeout(self.lookup_timeout, self.directory.find_agent_by_token(token))
            .await
        {
            Ok(Ok(Some(agent))) => Some(agent),
            Ok(Ok(None)) => {
                debug!("No agent owns the presented security token");
                None
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Security token lookup failed");
                None
            }
            Err(_) => {
                debug!(timeout = ?self.lookup_timeout, "Security token lookup timed out");
                None
            }
        }
    }
}
