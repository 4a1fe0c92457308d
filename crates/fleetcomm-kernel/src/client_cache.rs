//! Per-agent cache of outbound clients.
//!
//! Each entry remembers the agent token it was built for. A lookup with a
//! different token treats the entry as stale: it is replaced by a new client
//! and the old one is handed back for the caller to stop outside the lock.
//!
//! Each key also has an async lock. Holding it keeps every other lookup of
//! that agent out, across `.await` points, while a client is torn down and
//! its spool file purged.

use dashmap::DashMap;
use fleetcomm_types::EndpointKey;
use fleetcomm_wire::{OutboundClient, WireError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

struct CachedClient {
    client: Arc<dyn OutboundClient>,
    token: String,
}

/// Result of [`OutboundClientCache::get_or_create`].
pub struct ClientLookup {
    pub client: Arc<dyn OutboundClient>,
    /// Whether `client` was created by this lookup.
    pub created: bool,
    /// A stale client evicted by this lookup. The caller must stop it.
    pub replaced: Option<Arc<dyn OutboundClient>>,
}

#[derive(Default)]
pub struct OutboundClientCache {
    entries: Mutex<HashMap<EndpointKey, CachedClient>>,
    key_locks: DashMap<EndpointKey, Arc<tokio::sync::Mutex<()>>>,
}

impl OutboundClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to one agent's entry until the guard drops.
    pub async fn lock_key(&self, key: &EndpointKey) -> OwnedMutexGuard<()> {
        let lock = self.key_locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Return the cached client for `key` if it was built for `token`,
    /// otherwise build one with `create` and cache it.
    pub fn get_or_create<F>(
        &self,
        key: EndpointKey,
        token: &str,
        create: F,
    ) -> Result<ClientLookup, WireError>
    where
        F: FnOnce() -> Result<Arc<dyn OutboundClient>, WireError>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(cached) = entries.get(&key) {
            if cached.token == token {
                return Ok(ClientLookup {
                    client: cached.client.clone(),
                    created: false,
                    replaced: None,
                });
            }
        }

        let client = create()?;
        let replaced = entries
            .insert(
                key,
                CachedClient {
                    client: client.clone(),
                    token: token.to_string(),
                },
            )
            .map(|old| old.client);

        Ok(ClientLookup {
            client,
            created: true,
            replaced,
        })
    }

    pub fn get(&self, key: &EndpointKey) -> Option<Arc<dyn OutboundClient>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|c| c.client.clone())
    }

    pub fn remove(&self, key: &EndpointKey) -> Option<Arc<dyn OutboundClient>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).map(|c| c.client)
    }

    /// Empty the cache, returning every client that was in it.
    pub fn drain(&self) -> Vec<(EndpointKey, Arc<dyn OutboundClient>)> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.drain().map(|(k, c)| (k, c.client)).collect()
    }

    pub fn contains(&self, key: &EndpointKey) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
