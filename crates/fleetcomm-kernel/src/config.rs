//! Server configuration: preference keys, the typed [`ServerConfig`] view,
//! and the procedure that prepares the preferences node on start.
//!
//! The configuration file is a TOML document. Nested tables are flattened to
//! dotted preference keys, so these two files are equivalent:
//!
//! ```toml
//! [fleetcomm.server.client]
//! queue-size = 1000
//! ```
//!
//! ```toml
//! "fleetcomm.server.client.queue-size" = "1000"
//! ```

use crate::error::{KernelError, KernelResult};
use crate::preferences::PreferencesStore;
use crate::properties::PropertiesFile;
use crate::upgrade;
use fleetcomm_wire::concurrency::GLOBAL_LIMIT_NAME;
use fleetcomm_wire::sender::{
    QueueThrottling, SendThrottling, SenderConfig, SenderSecurity, DEFAULT_COMMAND_TIMEOUT_MS,
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_SIZE, DEFAULT_RETRY_INTERVAL_MS,
    DEFAULT_SPOOL_FILE_MAX_SIZE, DEFAULT_SPOOL_FILE_NAME, DEFAULT_SPOOL_FILE_PURGE_PERCENTAGE,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, warn};

pub const CONFIG_SCHEMA_VERSION: &str = "fleetcomm.server.config-schema-version";
pub const CURRENT_CONFIG_SCHEMA_VERSION: u32 = 3;

pub const CONNECTOR_TRANSPORT: &str = "fleetcomm.communications.connector.transport";
pub const DEFAULT_CONNECTOR_TRANSPORT: &str = "socket";
pub const CONNECTOR_BIND_ADDRESS: &str = "fleetcomm.communications.connector.bind-address";
pub const DEFAULT_CONNECTOR_BIND_ADDRESS: &str = "0.0.0.0";
pub const CONNECTOR_BIND_PORT: &str = "fleetcomm.communications.connector.bind-port";
pub const DEFAULT_CONNECTOR_BIND_PORT: u16 = 7080;
pub const CONNECTOR_SECURITY_ALGORITHM: &str =
    "fleetcomm.communications.connector.security.algorithm";
pub const DEFAULT_SECURITY_ALGORITHM: &str = "TLS";
pub const DATA_DIRECTORY: &str = "fleetcomm.communications.data-directory";
pub const DEFAULT_DATA_DIRECTORY: &str = "data";

pub const CLIENT_SENDER_QUEUE_SIZE: &str = "fleetcomm.server.client.queue-size";
pub const CLIENT_SENDER_MAX_CONCURRENT: &str = "fleetcomm.server.client.max-concurrent";
pub const CLIENT_SENDER_COMMAND_TIMEOUT: &str = "fleetcomm.server.client.command-timeout-msecs";
pub const CLIENT_SENDER_RETRY_INTERVAL: &str = "fleetcomm.server.client.retry-interval-msecs";
pub const CLIENT_SENDER_MAX_RETRIES: &str = "fleetcomm.server.client.max-retries";
pub const CLIENT_SENDER_SPOOL_FILE_NAME: &str = "fleetcomm.server.client.command-spool-file.name";
pub const CLIENT_SENDER_SPOOL_FILE_PARAMS: &str =
    "fleetcomm.server.client.command-spool-file.params";
pub const CLIENT_SENDER_SPOOL_FILE_COMPRESSED: &str =
    "fleetcomm.server.client.command-spool-file.compressed";
pub const CLIENT_SENDER_SEND_THROTTLING: &str = "fleetcomm.server.client.send-throttling";
pub const CLIENT_SENDER_QUEUE_THROTTLING: &str = "fleetcomm.server.client.queue-throttling";

pub const CLIENT_SENDER_SECURITY_SOCKET_PROTOCOL: &str =
    "fleetcomm.server.client.security.secure-socket-protocol";
pub const CLIENT_SENDER_SECURITY_SERVER_AUTH_MODE: &str =
    "fleetcomm.server.client.security.server-auth-mode-enabled";
pub const CLIENT_SENDER_SECURITY_KEYSTORE_FILE: &str =
    "fleetcomm.server.client.security.keystore.file";
pub const CLIENT_SENDER_SECURITY_KEYSTORE_TYPE: &str =
    "fleetcomm.server.client.security.keystore.type";
pub const CLIENT_SENDER_SECURITY_KEYSTORE_ALIAS: &str =
    "fleetcomm.server.client.security.keystore.alias";
pub const CLIENT_SENDER_SECURITY_TRUSTSTORE_FILE: &str =
    "fleetcomm.server.client.security.truststore.file";
pub const CLIENT_SENDER_SECURITY_TRUSTSTORE_TYPE: &str =
    "fleetcomm.server.client.security.truststore.type";
pub const DEFAULT_STORE_TYPE: &str = "JKS";

pub const GLOBAL_CONCURRENCY_LIMIT: &str = "fleetcomm.communications.global-concurrency-limit";
pub const CONCURRENCY_LIMIT_PREFIX: &str = "fleetcomm.server.concurrency-limit.";

/// Minimum spool file size accepted in the spool file parameters.
const MIN_SPOOL_FILE_MAX_SIZE: u64 = 10_000;
/// Minimum quiet/burst period accepted for throttling.
const MIN_THROTTLE_PERIOD_MS: u64 = 100;

/// Transports that run over TLS and bind the secure port.
const SECURE_TRANSPORTS: &[&str] = &["sslsocket", "https", "sslservlet"];

/// Property key under which a concurrency limit is persisted.
pub fn limit_property_key(limit_name: &str) -> String {
    if limit_name == GLOBAL_LIMIT_NAME {
        GLOBAL_CONCURRENCY_LIMIT.to_string()
    } else {
        format!("{CONCURRENCY_LIMIT_PREFIX}{limit_name}")
    }
}

/// Inverse of [`limit_property_key`].
pub fn limit_name_from_key(key: &str) -> Option<&str> {
    if key == GLOBAL_CONCURRENCY_LIMIT {
        Some(GLOBAL_LIMIT_NAME)
    } else {
        key.strip_prefix(CONCURRENCY_LIMIT_PREFIX)
            .filter(|name| !name.is_empty())
    }
}

pub fn is_transport_secure(transport: &str) -> bool {
    SECURE_TRANSPORTS.contains(&transport.to_ascii_lowercase().as_str())
}

/// Address and ports this server is registered with in the server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub address: String,
    pub port: u16,
    pub secure_port: u16,
}

/// Read-only typed view over a snapshot of the preferences node.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    prefs: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn new(prefs: BTreeMap<String, String>) -> Self {
        Self { prefs }
    }

    /// The raw preferences behind this view.
    pub fn preferences(&self) -> &BTreeMap<String, String> {
        &self.prefs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prefs.get(key).map(String::as_str)
    }

    fn parsed<T: FromStr + Copy + std::fmt::Display>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = raw, default = %default, "Invalid preference, using default");
                default
            }),
            None => default,
        }
    }

    /// Schema version of the node; 0 when untagged.
    pub fn schema_version(&self) -> u32 {
        self.parsed(CONFIG_SCHEMA_VERSION, 0)
    }

    pub fn transport(&self) -> &str {
        self.get(CONNECTOR_TRANSPORT)
            .unwrap_or(DEFAULT_CONNECTOR_TRANSPORT)
    }

    pub fn bind_address(&self) -> Option<&str> {
        self.get(CONNECTOR_BIND_ADDRESS).filter(|a| !a.is_empty())
    }

    pub fn bind_port(&self) -> Option<u16> {
        self.get(CONNECTOR_BIND_PORT)
            .and_then(|p| p.trim().parse::<i32>().ok())
            .filter(|p| *p > 0)
            .and_then(|p| u16::try_from(p).ok())
    }

    pub fn security_algorithm(&self) -> &str {
        self.get(CONNECTOR_SECURITY_ALGORITHM)
            .unwrap_or(DEFAULT_SECURITY_ALGORITHM)
    }

    pub fn data_directory(&self) -> PathBuf {
        PathBuf::from(self.get(DATA_DIRECTORY).unwrap_or(DEFAULT_DATA_DIRECTORY))
    }

    /// Zero or less means unbounded.
    pub fn client_queue_size(&self) -> u32 {
        self.parsed(CLIENT_SENDER_QUEUE_SIZE, DEFAULT_QUEUE_SIZE)
    }

    pub fn client_max_concurrent(&self) -> u32 {
        let value: u32 = self.parsed(CLIENT_SENDER_MAX_CONCURRENT, DEFAULT_MAX_CONCURRENT);
        if value < 1 {
            warn!(
                key = CLIENT_SENDER_MAX_CONCURRENT,
                value,
                default = DEFAULT_MAX_CONCURRENT,
                "Preference must be greater than 0, using default"
            );
            return DEFAULT_MAX_CONCURRENT;
        }
        value
    }

    pub fn client_command_timeout_ms(&self) -> u64 {
        self.parsed(CLIENT_SENDER_COMMAND_TIMEOUT, DEFAULT_COMMAND_TIMEOUT_MS)
    }

    pub fn client_retry_interval_ms(&self) -> u64 {
        self.parsed(CLIENT_SENDER_RETRY_INTERVAL, DEFAULT_RETRY_INTERVAL_MS)
    }

    pub fn client_max_retries(&self) -> u32 {
        self.parsed(CLIENT_SENDER_MAX_RETRIES, DEFAULT_MAX_RETRIES)
    }

    /// `None` when spooling (and so guaranteed delivery) is disabled.
    pub fn client_spool_file_name(&self) -> Option<String> {
        match self.get(CLIENT_SENDER_SPOOL_FILE_NAME) {
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name.trim().to_string()),
            None => Some(DEFAULT_SPOOL_FILE_NAME.to_string()),
        }
    }

    /// Spool file `(max size, purge percentage)`.
    pub fn client_spool_file_params(&self) -> (u64, u8) {
        let default = (DEFAULT_SPOOL_FILE_MAX_SIZE, DEFAULT_SPOOL_FILE_PURGE_PERCENTAGE);
        match self.get(CLIENT_SENDER_SPOOL_FILE_PARAMS) {
            Some(raw) => parse_spool_file_params(raw).unwrap_or_else(|reason| {
                warn!(key = CLIENT_SENDER_SPOOL_FILE_PARAMS, value = raw, %reason, "Bad spool file parameters, using defaults");
                default
            }),
            None => default,
        }
    }

    pub fn client_spool_file_compressed(&self) -> bool {
        self.parsed(CLIENT_SENDER_SPOOL_FILE_COMPRESSED, false)
    }

    pub fn client_send_throttling(&self) -> Option<SendThrottling> {
        let raw = self.get(CLIENT_SENDER_SEND_THROTTLING)?;
        parse_send_throttling(raw)
            .map_err(|reason| {
                warn!(key = CLIENT_SENDER_SEND_THROTTLING, value = raw, %reason, "Bad send throttling, disabling it");
            })
            .ok()
    }

    pub fn client_queue_throttling(&self) -> Option<QueueThrottling> {
        let raw = self.get(CLIENT_SENDER_QUEUE_THROTTLING)?;
        parse_queue_throttling(raw)
            .map_err(|reason| {
                warn!(key = CLIENT_SENDER_QUEUE_THROTTLING, value = raw, %reason, "Bad queue throttling, disabling it");
            })
            .ok()
    }

    pub fn client_security(&self) -> SenderSecurity {
        SenderSecurity {
            server_auth_mode: self.parsed(CLIENT_SENDER_SECURITY_SERVER_AUTH_MODE, false),
            secure_socket_protocol: self
                .get(CLIENT_SENDER_SECURITY_SOCKET_PROTOCOL)
                .unwrap_or(DEFAULT_SECURITY_ALGORITHM)
                .to_string(),
            algorithm: self.security_algorithm().to_string(),
            keystore_file: self.get(CLIENT_SENDER_SECURITY_KEYSTORE_FILE).map(PathBuf::from),
            keystore_type: self
                .get(CLIENT_SENDER_SECURITY_KEYSTORE_TYPE)
                .unwrap_or(DEFAULT_STORE_TYPE)
                .to_string(),
            keystore_alias: self
                .get(CLIENT_SENDER_SECURITY_KEYSTORE_ALIAS)
                .map(str::to_string),
            truststore_file: self
                .get(CLIENT_SENDER_SECURITY_TRUSTSTORE_FILE)
                .map(PathBuf::from),
            truststore_type: self
                .get(CLIENT_SENDER_SECURITY_TRUSTSTORE_TYPE)
                .unwrap_or(DEFAULT_STORE_TYPE)
                .to_string(),
        }
    }

    /// The full outbound client configuration, before per-agent specialisation.
    pub fn sender_config(&self) -> SenderConfig {
        let (spool_file_max_size, spool_file_purge_percentage) = self.client_spool_file_params();
        SenderConfig {
            default_timeout_ms: self.client_command_timeout_ms(),
            max_concurrent: self.client_max_concurrent(),
            queue_size: self.client_queue_size(),
            data_directory: self.data_directory(),
            server_polling_interval_ms: -1,
            retry_interval_ms: self.client_retry_interval_ms(),
            max_retries: self.client_max_retries(),
            spool_file_name: self.client_spool_file_name(),
            spool_file_max_size,
            spool_file_purge_percentage,
            spool_file_compressed: self.client_spool_file_compressed(),
            queue_throttling: self.client_queue_throttling(),
            send_throttling: self.client_send_throttling(),
            security: self.client_security(),
        }
    }

    /// Every concurrency limit present in the preferences.
    pub fn concurrency_limits(&self) -> BTreeMap<String, i32> {
        self.prefs
            .iter()
            .filter_map(|(key, value)| {
                let name = limit_name_from_key(key)?;
                match value.trim().parse::<i32>() {
                    Ok(limit) => Some((name.to_string(), limit)),
                    Err(_) => {
                        warn!(key = %key, value = %value, "Ignoring non-numeric concurrency limit");
                        None
                    }
                }
            })
            .collect()
    }
}

fn split_pair(raw: &str) -> Result<(&str, &str), String> {
    let mut parts = raw.split(':').map(str::trim);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Ok((a, b)),
        _ => Err("expected two values separated by ':'".to_string()),
    }
}

/// Parse `"maxSize:purgePercentage"`.
pub fn parse_spool_file_params(raw: &str) -> Result<(u64, u8), String> {
    let (size, purge) = split_pair(raw)?;
    let size: u64 = size.parse().map_err(|e| format!("max size: {e}"))?;
    let purge: i64 = purge.parse().map_err(|e| format!("purge percentage: {e}"))?;
    if size < MIN_SPOOL_FILE_MAX_SIZE {
        return Err(format!("max size must be at least {MIN_SPOOL_FILE_MAX_SIZE}"));
    }
    if !(0..100).contains(&purge) {
        return Err("purge percentage must be between 0 and 99".to_string());
    }
    Ok((size, purge as u8))
}

/// Parse `"maxCommands:quietPeriodMillis"`.
pub fn parse_send_throttling(raw: &str) -> Result<SendThrottling, String> {
    let (max, period) = split_pair(raw)?;
    let max_commands: i64 = max.parse().map_err(|e| format!("max commands: {e}"))?;
    let quiet_period_ms: u64 = period.parse().map_err(|e| format!("quiet period: {e}"))?;
    if max_commands <= 0 {
        return Err("max commands must be greater than 0".to_string());
    }
    if quiet_period_ms < MIN_THROTTLE_PERIOD_MS {
        return Err(format!("quiet period must be at least {MIN_THROTTLE_PERIOD_MS}ms"));
    }
    Ok(SendThrottling {
        max_commands: max_commands as u64,
        quiet_period_ms,
    })
}

/// Parse `"maxCommands:burstPeriodMillis"`.
pub fn parse_queue_throttling(raw: &str) -> Result<QueueThrottling, String> {
    let (max, period) = split_pair(raw)?;
    let max_commands: i64 = max.parse().map_err(|e| format!("max commands: {e}"))?;
    let burst_period_ms: u64 = period.parse().map_err(|e| format!("burst period: {e}"))?;
    if max_commands <= 0 || max_commands > i64::from(u32::MAX) {
        return Err("max commands must be greater than 0".to_string());
    }
    if burst_period_ms < MIN_THROTTLE_PERIOD_MS {
        return Err(format!("burst period must be at least {MIN_THROTTLE_PERIOD_MS}ms"));
    }
    Ok(QueueThrottling {
        max_commands: max_commands as u32,
        burst_period_ms,
    })
}

/// Expand `${VAR}` and `${VAR:default}` from the process environment.
///
/// Unresolvable references without a default are left as written.
pub fn expand_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let reference = &after[..end];
        let (name, default) = match reference.split_once(':') {
            Some((n, d)) => (n, Some(d)),
            None => (reference, None),
        };
        match (std::env::var(name).ok(), default) {
            (Some(v), _) => out.push_str(&v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => out.push_str(&rest[start..start + 3 + end]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Read a TOML configuration file and flatten it to dotted preference keys.
pub fn read_config_file(path: &Path) -> KernelResult<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| KernelError::ConfigImport {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let value: toml::Value = toml::from_str(&contents).map_err(|e| KernelError::ConfigImport {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut flat = BTreeMap::new();
    flatten_toml("", &value, &mut flat);
    Ok(flat)
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_toml(&key, v, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        toml::Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Replace the node's contents with the configuration file.
///
/// The previous preferences are backed up first and restored if the file
/// cannot be read, cannot be parsed, or carries no schema version.
pub fn import_config_file(prefs: &PreferencesStore, path: &Path) -> KernelResult<()> {
    if !path.is_file() {
        return Err(KernelError::ConfigFileNotFound(path.to_path_buf()));
    }
    debug!(node = prefs.node_name(), file = %path.display(), "Loading configuration file");

    let backup = prefs.snapshot();
    prefs.clear();

    let imported = read_config_file(path).and_then(|values| {
        if ServerConfig::new(values.clone()).schema_version() == 0 {
            return Err(KernelError::ConfigImport {
                path: path.to_path_buf(),
                reason: format!("no {CONFIG_SCHEMA_VERSION} defined for node '{}'", prefs.node_name()),
            });
        }
        Ok(values)
    });

    match imported {
        Ok(values) => {
            prefs.replace(values);
            info!(file = %path.display(), "Loaded configuration file");
            Ok(())
        }
        Err(e) => {
            prefs.replace(backup);
            Err(e)
        }
    }
}

/// Fill in the connector bind address and port when the configuration leaves
/// them unset, from this server's directory identity.
pub fn apply_bind_defaults(prefs: &PreferencesStore, identity: Option<&ServerIdentity>) {
    let config = ServerConfig::new(prefs.snapshot());
    let secure = is_transport_secure(config.transport());

    match identity {
        Some(identity) => {
            if config.bind_address().is_none() {
                prefs.put(CONNECTOR_BIND_ADDRESS, identity.address.clone());
            }
            if config.bind_port().is_none() {
                let port = if secure {
                    identity.secure_port
                } else {
                    identity.port
                };
                prefs.put(CONNECTOR_BIND_PORT, port.to_string());
            }
        }
        None => {
            error!("Server identity unknown, unable to set explicit connector address/port, using defaults");
            if config.bind_address().is_none() {
                prefs.put(CONNECTOR_BIND_ADDRESS, DEFAULT_CONNECTOR_BIND_ADDRESS);
            }
            if config.bind_port().is_none() {
                prefs.put(CONNECTOR_BIND_PORT, DEFAULT_CONNECTOR_BIND_PORT.to_string());
            }
        }
    }
}

/// Collect the overrides laid on top of the configuration file: entries of
/// the override file, then explicit overrides, then the concurrency limits
/// persisted in the server properties file.
pub fn collect_overrides(
    overrides_file: Option<&Path>,
    explicit: &BTreeMap<String, String>,
    properties: &PropertiesFile,
) -> KernelResult<BTreeMap<String, String>> {
    let mut overrides = match overrides_file {
        Some(path) => PropertiesFile::new(path).load()?,
        None => BTreeMap::new(),
    };
    overrides.extend(explicit.clone());
    overrides.extend(
        properties
            .load()?
            .into_iter()
            .filter(|(key, _)| limit_name_from_key(key).is_some()),
    );
    Ok(overrides)
}

/// Populate the preferences node for a start.
///
/// The configuration file is imported only when the node carries no schema
/// version (callers pass an empty node to force a reload). Overrides are
/// laid on top, bind defaults are computed, the schema is upgraded, and the
/// node is persisted.
pub fn prepare_preferences(
    prefs: &PreferencesStore,
    config_file: &Path,
    overrides: &BTreeMap<String, String>,
    identity: Option<&ServerIdentity>,
) -> KernelResult<ServerConfig> {
    if ServerConfig::new(prefs.snapshot()).schema_version() == 0 {
        import_config_file(prefs, config_file)?;
    } else {
        debug!(node = prefs.node_name(), "Preferences already exist, not loading configuration file");
    }

    for (key, value) in overrides {
        let value = expand_vars(value);
        debug!(key = %key, value = %value, "Configuration preference override");
        prefs.put(key, value);
    }

    apply_bind_defaults(prefs, identity);
    upgrade::upgrade_to_latest(prefs);
    prefs.flush()?;

    let config = ServerConfig::new(prefs.snapshot());
    debug!(entries = config.preferences().len(), "Prepared configuration preferences");
    Ok(config)
}
