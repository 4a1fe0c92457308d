//! Stepwise preference schema upgrades.

use crate::config::{
    ServerConfig, CLIENT_SENDER_SPOOL_FILE_PARAMS, CONFIG_SCHEMA_VERSION,
    CONNECTOR_SECURITY_ALGORITHM, CURRENT_CONFIG_SCHEMA_VERSION, DEFAULT_SECURITY_ALGORITHM,
};
use crate::preferences::PreferencesStore;
use tracing::{debug, info};

/// Spool file parameters key used by schema version 1.
pub const LEGACY_SPOOL_FILE_SIZE: &str = "fleetcomm.server.client.command-spool-file.size";

/// Bring the node up to [`CURRENT_CONFIG_SCHEMA_VERSION`], one version at a
/// time. Returns the version the node started at.
pub fn upgrade_to_latest(prefs: &PreferencesStore) -> u32 {
    let from = ServerConfig::new(prefs.snapshot()).schema_version();
    let mut version = from;

    while version < CURRENT_CONFIG_SCHEMA_VERSION {
        match version {
            0 | 1 => upgrade_v1_to_v2(prefs),
            2 => upgrade_v2_to_v3(prefs),
            _ => {}
        }
        version += 1;
        prefs.put(CONFIG_SCHEMA_VERSION, version.to_string());
    }

    if from < CURRENT_CONFIG_SCHEMA_VERSION {
        info!(from, to = CURRENT_CONFIG_SCHEMA_VERSION, "Upgraded configuration preferences");
    } else {
        debug!(version = from, "Configuration preferences are current");
    }
    from
}

fn upgrade_v1_to_v2(prefs: &PreferencesStore) {
    if let Some(value) = prefs.remove(LEGACY_SPOOL_FILE_SIZE) {
        if prefs.get(CLIENT_SENDER_SPOOL_FILE_PARAMS).is_none() {
            prefs.put(CLIENT_SENDER_SPOOL_FILE_PARAMS, value);
        }
    }
}

fn upgrade_v2_to_v3(prefs: &PreferencesStore) {
    if prefs.get(CONNECTOR_SECURITY_ALGORITHM).is_none() {
        prefs.put(CONNECTOR_SECURITY_ALGORITHM, DEFAULT_SECURITY_ALGORITHM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_from_v1() {
        let prefs = PreferencesStore::in_memory("node");
        prefs.put(CONFIG_SCHEMA_VERSION, "1");
        prefs.put(LEGACY_SPOOL_FILE_SIZE, "20000:50");

        assert_eq!(upgrade_to_latest(&prefs), 1);
        assert_eq!(prefs.get(CONFIG_SCHEMA_VERSION).as_deref(), Some("3"));
        assert!(prefs.get(LEGACY_SPOOL_FILE_SIZE).is_none());
        assert_eq!(
            prefs.get(CLIENT_SENDER_SPOOL_FILE_PARAMS).as_deref(),
            Some("20000:50")
        );
        assert_eq!(
            prefs.get(CONNECTOR_SECURITY_ALGORITHM).as_deref(),
            Some(DEFAULT_SECURITY_ALGORITHM)
        );
    }

    #[test]
    fn test_upgrade_keeps_explicit_algorithm() {
        let prefs = PreferencesStore::in_memory("node");
        prefs.put(CONFIG_SCHEMA_VERSION, "2");
        prefs.put(CONNECTOR_SECURITY_ALGORITHM, "TLSv1.3");
        upgrade_to_latest(&prefs);
        assert_eq!(
            prefs.get(CONNECTOR_SECURITY_ALGORITHM).as_deref(),
            Some("TLSv1.3")
        );
    }

    #[test]
    fn test_current_is_untouched() {
        let prefs = PreferencesStore::in_memory("node");
        prefs.put(CONFIG_SCHEMA_VERSION, "3");
        prefs.put(LEGACY_SPOOL_FILE_SIZE, "stays");
        assert_eq!(upgrade_to_latest(&prefs), 3);
        assert_eq!(prefs.get(LEGACY_SPOOL_FILE_SIZE).as_deref(), Some("stays"));
    }
}
