//! Outbound sender configuration.
//!
//! A [`SenderConfig`] describes how the transport container should build an
//! outbound client: queueing, retries, throttling, and the spool file used
//! for guaranteed delivery. Spool files hold requests for exactly one remote
//! endpoint, so configurations are specialised per agent before use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_CONCURRENT: u32 = 5;
pub const DEFAULT_QUEUE_SIZE: u32 = 50_000;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_SPOOL_FILE_NAME: &str = "command-spool.dat";
pub const DEFAULT_SPOOL_FILE_MAX_SIZE: u64 = 10_000_000;
pub const DEFAULT_SPOOL_FILE_PURGE_PERCENTAGE: u8 = 75;

/// Limits how fast queued commands are dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueThrottling {
    /// Commands dequeued per burst period.
    pub max_commands: u32,
    /// Length of a burst period.
    pub burst_period_ms: u64,
}

/// Forces quiet periods between batches of sent commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendThrottling {
    /// Commands sent before a quiet period starts.
    pub max_commands: u64,
    /// Length of each quiet period.
    pub quiet_period_ms: u64,
}

/// TLS settings handed to the transport for secure protocols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSecurity {
    pub server_auth_mode: bool,
    pub secure_socket_protocol: String,
    pub algorithm: String,
    pub keystore_file: Option<PathBuf>,
    pub keystore_type: String,
    pub keystore_alias: Option<String>,
    pub truststore_file: Option<PathBuf>,
    pub truststore_type: String,
}

/// Configuration of one outbound client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    pub default_timeout_ms: u64,
    pub max_concurrent: u32,
    pub queue_size: u32,
    pub data_directory: PathBuf,
    /// Negative disables polling of the remote endpoint.
    pub server_polling_interval_ms: i64,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
    /// `None` disables spooling and therefore guaranteed delivery.
    pub spool_file_name: Option<String>,
    pub spool_file_max_size: u64,
    pub spool_file_purge_percentage: u8,
    pub spool_file_compressed: bool,
    pub queue_throttling: Option<QueueThrottling>,
    pub send_throttling: Option<SendThrottling>,
    pub security: SenderSecurity,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_size: DEFAULT_QUEUE_SIZE,
            data_directory: PathBuf::from("data"),
            server_polling_interval_ms: -1,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            spool_file_name: Some(DEFAULT_SPOOL_FILE_NAME.to_string()),
            spool_file_max_size: DEFAULT_SPOOL_FILE_MAX_SIZE,
            spool_file_purge_percentage: DEFAULT_SPOOL_FILE_PURGE_PERCENTAGE,
            spool_file_compressed: false,
            queue_throttling: None,
            send_throttling: None,
            security: SenderSecurity::default(),
        }
    }
}

impl SenderConfig {
    /// Whether requests flagged for guaranteed delivery are spooled to disk.
    pub fn guaranteed_delivery(&self) -> bool {
        self.spool_file_name.is_some()
    }

    /// Absolute location of the spool file, resolved against the data directory.
    pub fn spool_file_path(&self) -> Option<PathBuf> {
        self.spool_file_name
            .as_ref()
            .map(|name| self.data_directory.join(name))
    }

    /// Specialise this configuration for one agent.
    ///
    /// The spool file name is prefixed with the agent name so no two agents
    /// share a spool file: `spool/cmd.dat` becomes `spool/<agent>_cmd.dat`.
    /// The name is reduced to a single safe path component first.
    pub fn for_agent(&self, agent_name: &str) -> Self {
        let agent_name = spool_safe_name(agent_name);
        let mut config = self.clone();
        if let Some(name) = &self.spool_file_name {
            let path = Path::new(name);
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            let per_agent = format!("{agent_name}_{file_name}");
            let rewritten = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => parent.join(per_agent),
                None => PathBuf::from(per_agent),
            };
            config.spool_file_name = Some(rewritten.to_string_lossy().into_owned());
        }
        config
    }

    /// A stripped-down configuration for one-shot connectivity probes:
    /// no spooling, no throttling, no polling.
    pub fn for_probe(&self) -> Self {
        Self {
            spool_file_name: None,
            queue_throttling: None,
            send_throttling: None,
            server_polling_interval_ms: -1,
            ..self.clone()
        }
    }
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_`, and never yield a
/// name made only of dots.
fn spool_safe_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "_".repeat(safe.len().max(1))
    } else {
        safe
    }
}
