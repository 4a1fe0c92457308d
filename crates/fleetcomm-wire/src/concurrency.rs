//! Concurrency limits: named admission control for inbound RPCs.
//!
//! A [`ConcurrencyManager`] is an immutable snapshot of every configured
//! limit, each backed by a tokio semaphore. Limits are never changed in
//! place: adjusting a limit builds a new manager from the full set of
//! configured limits plus the change, and the transport container swaps the
//! new snapshot in by reference. In-flight permits keep the semaphore of the
//! snapshot they were acquired from.
//!
//! Inbound RPCs are admitted through the global limit first, then through
//! the limit of their [`RpcCategory`].

use crate::transport::WireError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Name of the limit that applies to every inbound RPC.
pub const GLOBAL_LIMIT_NAME: &str = "global";

/// A value that disables a limit.
pub const UNLIMITED: i32 = -1;

/// Categories of inbound RPCs with independent admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCategory {
    InventoryReport,
    AvailabilityReport,
    InventorySync,
    ContentReport,
    ContentDownload,
    MeasurementReport,
    MeasurementScheduleRequest,
    ConfigurationUpdate,
}

impl RpcCategory {
    pub const ALL: [RpcCategory; 8] = [
        RpcCategory::InventoryReport,
        RpcCategory::AvailabilityReport,
        RpcCategory::InventorySync,
        RpcCategory::ContentReport,
        RpcCategory::ContentDownload,
        RpcCategory::MeasurementReport,
        RpcCategory::MeasurementScheduleRequest,
        RpcCategory::ConfigurationUpdate,
    ];

    /// The limit name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCategory::InventoryReport => "inventory-report",
            RpcCategory::AvailabilityReport => "availability-report",
            RpcCategory::InventorySync => "inventory-sync",
            RpcCategory::ContentReport => "content-report",
            RpcCategory::ContentDownload => "content-download",
            RpcCategory::MeasurementReport => "measurement-report",
            RpcCategory::MeasurementScheduleRequest => "measurement-schedule-request",
            RpcCategory::ConfigurationUpdate => "configuration-update",
        }
    }

    /// Look up a category by its limit name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for RpcCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permits held while an admitted RPC runs. Dropping it releases them.
#[derive(Debug)]
pub struct AdmissionPermit {
    _global: Option<OwnedSemaphorePermit>,
    _category: Option<OwnedSemaphorePermit>,
}

/// Immutable snapshot of configured limits with their semaphores.
#[derive(Debug)]
pub struct ConcurrencyManager {
    limits: BTreeMap<String, i32>,
    semaphores: HashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyManager {
    /// Build a manager. Limits of zero or less are recorded but unenforced.
    pub fn new(limits: BTreeMap<String, i32>) -> Self {
        let semaphores = limits
            .iter()
            .filter(|(_, permits)| **permits > 0)
            .map(|(name, &permits)| (name.clone(), Arc::new(Semaphore::new(permits as usize))))
            .collect();
        Self { limits, semaphores }
    }

    /// A manager that enforces nothing.
    pub fn unlimited() -> Self {
        Self::new(BTreeMap::new())
    }

    /// The configured permit count for a limit, if one was configured.
    pub fn configured_permits(&self, name: &str) -> Option<i32> {
        self.limits.get(name).copied()
    }

    /// Every configured limit.
    pub fn all_configured_permits(&self) -> BTreeMap<String, i32> {
        self.limits.clone()
    }

    /// A new snapshot carrying every current limit plus one change.
    pub fn with_limit(&self, name: &str, permits: i32) -> Self {
        let mut limits = self.all_configured_permits();
        limits.insert(name.to_string(), permits);
        Self::new(limits)
    }

    /// Permits currently available, or `None` when the limit is not enforced.
    pub fn available_permits(&self, name: &str) -> Option<usize> {
        self.semaphores.get(name).map(|s| s.available_permits())
    }

    /// Wait for a permit of the named limit. Unenforced limits admit at once.
    pub async fn acquire(&self, name: &str) -> Result<Option<OwnedSemaphorePermit>, WireError> {
        match self.semaphores.get(name) {
            Some(sem) => sem
                .clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| WireError::LimitClosed(name.to_string())),
            None => Ok(None),
        }
    }

    /// Take a permit without waiting.
    pub fn try_acquire(&self, name: &str) -> Result<Option<OwnedSemaphorePermit>, WireError> {
        match self.semaphores.get(name) {
            Some(sem) => sem
                .clone()
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| WireError::LimitReached(name.to_string())),
            None => Ok(None),
        }
    }

    /// Admit an RPC through the global limit and then its category limit.
    pub async fn admit(&self, category: Option<&str>) -> Result<AdmissionPermit, WireError> {
        let global = self.acquire(GLOBAL_LIMIT_NAME).await?;
        let category = match category {
            Some(name) => self.acquire(name).await?,
            None => None,
        };
        Ok(AdmissionPermit {
            _global: global,
            _category: category,
        })
    }

    /// Like [`admit`](Self::admit) but refuses instead of waiting when a
    /// limit is saturated.
    pub fn try_admit(&self, category: Option<&str>) -> Result<AdmissionPermit, WireError> {
        let global = self.try_acquire(GLOBAL_LIMIT_NAME)?;
        let category = match category {
            Some(name) => self.try_acquire(name)?,
            None => None,
        };
        Ok(AdmissionPermit {
            _global: global,
            _category: category,
        })
    }
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(pairs: &[(&str, i32)]) -> BTreeMap<String, i32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in RpcCategory::ALL {
            assert_eq!(RpcCategory::from_name(category.as_str()), Some(category));
        }
        assert_eq!(RpcCategory::from_name("bogus"), None);
    }

    #[test]
    fn test_non_positive_limits_are_unenforced() {
        let mgr = ConcurrencyManager::new(limits(&[("global", -1), ("inventory-report", 0)]));
        assert_eq!(mgr.configured_permits("global"), Some(-1));
        assert_eq!(mgr.available_permits("global"), None);
        assert!(mgr.try_acquire("inventory-report").unwrap().is_none());
    }

    #[test]
    fn test_try_acquire_when_full() {
        let mgr = ConcurrencyManager::new(limits(&[("inventory-report", 1)]));
        let _held = mgr.try_acquire("inventory-report").unwrap();
        assert!(matches!(
            mgr.try_acquire("inventory-report"),
            Err(WireError::LimitReached(_))
        ));
    }

    #[test]
    fn test_with_limit_keeps_other_limits() {
        let mgr = ConcurrencyManager::new(limits(&[("global", 50), ("inventory-sync", 3)]));
        let next = mgr.with_limit("content-report", 5);
        assert_eq!(next.configured_permits("global"), Some(50));
        assert_eq!(next.configured_permits("inventory-sync"), Some(3));
        assert_eq!(next.configured_permits("content-report"), Some(5));
        // The original snapshot is untouched.
        assert_eq!(mgr.configured_permits("content-report"), None);
    }

    #[tokio::test]
    async fn test_admit_holds_global_and_category() {
        let mgr = ConcurrencyManager::new(limits(&[("global", 2), ("measurement-report", 1)]));
        let permit = mgr.admit(Some("measurement-report")).await.unwrap();
        assert_eq!(mgr.available_permits("global"), Some(1));
        assert_eq!(mgr.available_permits("measurement-report"), Some(0));
        drop(permit);
        assert_eq!(mgr.available_permits("global"), Some(2));
        assert_eq!(mgr.available_permits("measurement-report"), Some(1));
    }

    #[test]
    fn test_try_admit_releases_global_when_category_full() {
        let mgr = ConcurrencyManager::new(limits(&[("global", 5), ("content-download", 1)]));
        let _held = mgr.try_admit(Some("content-download")).unwrap();
        assert!(matches!(
            mgr.try_admit(Some("content-download")),
            Err(WireError::LimitReached(name)) if name == "content-download"
        ));
        assert_eq!(mgr.available_permits("global"), Some(4));
    }

    #[tokio::test]
    async fn test_admit_waits_for_release() {
        let mgr = Arc::new(ConcurrencyManager::new(limits(&[("inventory-report", 1)])));
        let first = mgr.admit(Some("inventory-report")).await.unwrap();

        let m = mgr.clone();
        let waiter = tokio::spawn(async move { m.admit(Some("inventory-report")).await.is_ok() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
    }
}
