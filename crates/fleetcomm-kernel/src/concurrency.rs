//! Named, runtime-adjustable admission limits.
//!
//! The live limiter is a [`ConcurrencyManager`] snapshot held by the
//! transport container. Changing a limit never mutates that snapshot: a new
//! one is built from every configured limit plus the change and swapped in
//! whole, so readers see either the old set or the new set.

use crate::config::limit_property_key;
use crate::error::KernelResult;
use crate::preferences::PreferencesStore;
use crate::properties::PropertiesFile;
use fleetcomm_types::FleetError;
use fleetcomm_wire::concurrency::UNLIMITED;
use fleetcomm_wire::{ConcurrencyManager, ServiceContainer};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Limit names are lowercase words joined by `-` (`global`, `inventory-report`).
pub fn validate_limit_name(name: &str) -> Result<(), FleetError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(FleetError::Config(format!(
            "Invalid concurrency limit name '{name}'"
        )))
    }
}

pub struct ConcurrencyLimitRegistry {
    container: Arc<dyn ServiceContainer>,
    properties: PropertiesFile,
    prefs: Arc<PreferencesStore>,
    /// Serializes read-modify-swap so two setters cannot drop each other's change.
    set_lock: Mutex<()>,
}

impl ConcurrencyLimitRegistry {
    pub fn new(
        container: Arc<dyn ServiceContainer>,
        properties: PropertiesFile,
        prefs: Arc<PreferencesStore>,
    ) -> Self {
        Self {
            container,
            properties,
            prefs,
            set_lock: Mutex::new(()),
        }
    }

    /// Configured permits for a limit; `None` or a value <= 0 means unlimited.
    pub fn get(&self, name: &str) -> Option<i32> {
        self.container.concurrency_manager().configured_permits(name)
    }

    pub fn all(&self) -> BTreeMap<String, i32> {
        self.container.concurrency_manager().all_configured_permits()
    }

    /// Change one limit.
    ///
    /// `None` means unlimited. With `persist` the value is written to the
    /// server properties file first and a write failure leaves the live
    /// limiter untouched.
    pub fn set(&self, name: &str, value: Option<i32>, persist: bool) -> KernelResult<()> {
        validate_limit_name(name)?;
        let permits = value.unwrap_or(UNLIMITED);
        let key = limit_property_key(name);

        let _guard = self.set_lock.lock().unwrap_or_else(|e| e.into_inner());

        if persist {
            self.properties.update(&key, &permits.to_string())?;
        }

        let next = self.container.concurrency_manager().with_limit(name, permits);
        self.container.set_concurrency_manager(Arc::new(next));
        self.prefs.put(&key, permits.to_string());

        info!(limit = name, permits, persisted = persist, "Concurrency limit changed");
        Ok(())
    }

    /// Install a fresh limiter built from `limits`, replacing every prior limit.
    pub fn reset(&self, limits: BTreeMap<String, i32>) {
        let _guard = self.set_lock.lock().unwrap_or_else(|e| e.into_inner());
        info!(limits = ?limits, "Installing concurrency limits");
        self.container
            .set_concurrency_manager(Arc::new(ConcurrencyManager::new(limits)));
    }
}
