//! Durable preferences node.
//!
//! Server configuration lives in a flat map of dotted keys
//! (`fleetcomm.server.client.queue-size = "50000"`), persisted as a TOML table
//! at `<dir>/<node>.toml`. The node is cleared and re-populated from the
//! configuration file on every start, so the file on disk always reflects
//! the configuration the running server was started with.

use crate::error::KernelResult;
use fleetcomm_types::FleetError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Default preferences node name.
pub const DEFAULT_NODE_NAME: &str = "fleetcomm-server";

/// A named, optionally file-backed, map of configuration preferences.
#[derive(Debug)]
pub struct PreferencesStore {
    node_name: String,
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, String>>,
}

impl PreferencesStore {
    /// A node that is never written to disk.
    pub fn in_memory(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            path: None,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open the node stored under `dir`, loading existing values if present.
    pub fn open(dir: &Path, node_name: &str) -> KernelResult<Self> {
        let path = dir.join(format!("{node_name}.toml"));
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(FleetError::Io)?;
            toml::from_str::<BTreeMap<String, String>>(&contents).map_err(|e| {
                FleetError::Serialization(format!("{}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "Opened preferences node");
        Ok(Self {
            node_name: node_name.to_string(),
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Backing file, if this node is persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    pub fn put(&self, key: &str, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key)
    }

    pub fn clear(&self) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.clear();
    }

    /// Copy of every preference.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.clone()
    }

    /// Replace every preference at once (import or restore from backup).
    pub fn replace(&self, new_values: BTreeMap<String, String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        *values = new_values;
    }

    /// Write the node to its backing file. In-memory nodes are a no-op.
    pub fn flush(&self) -> KernelResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = toml::to_string(&self.snapshot())
            .map_err(|e| FleetError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(FleetError::Io)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents).map_err(FleetError::Io)?;
        std::fs::rename(&tmp, path).map_err(FleetError::Io)?;
        Ok(())
    }
}
