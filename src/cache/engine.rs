//! Cache Engine Contract
//!
//! Operations every engine supports, the tier capability composite engines
//! rely on, and the upgradeable lock engines guard their state with.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use serde::Serialize;

use crate::cache::{CacheStats, CachedItem};
use crate::error::Result;

// == Engine Kind ==
/// Identifies the concrete engine behind a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Memory,
    Persistent,
    Tiered,
    Replicating,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::Memory => "memory",
            EngineKind::Persistent => "persistent",
            EngineKind::Tiered => "tiered",
            EngineKind::Replicating => "replicating",
        };
        f.write_str(name)
    }
}

// == Cache Engine ==
/// The contract shared by every cache engine.
///
/// Engines are internally synchronised; every method takes `&self` and may be
/// called from any number of threads at once.
pub trait CacheEngine: Send + Sync {
    /// Which engine this is.
    fn kind(&self) -> EngineKind;

    /// Inserts a new item.
    ///
    /// Fails with [`CacheError::DuplicateKey`](crate::error::CacheError::DuplicateKey)
    /// if the key is already present; existing items are never overwritten.
    fn add(
        &self,
        key: &str,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Result<()>;

    /// Returns the value, or `None` when the key is missing or expired.
    ///
    /// A hit on a sliding item renews its deadline.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Returns true if an unexpired item exists under `key`.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Replaces the value of an existing item, keeping its expiration policy.
    ///
    /// Fails with [`CacheError::NotFound`](crate::error::CacheError::NotFound)
    /// if the key is absent.
    fn update(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Deletes the item if present. Removing a missing key is a no-op.
    fn remove(&self, key: &str) -> Result<()>;

    /// Returns a snapshot of the live keys.
    fn keys(&self) -> Result<Vec<String>>;

    /// Returns the engine's counters.
    fn stats(&self) -> CacheStats;
}

// == Cache Tier ==
/// Capabilities composite engines and timers need from an inner engine.
pub trait CacheTier: CacheEngine {
    /// Returns the stored item, expired or not, without renewing it.
    fn get_item(&self, key: &str) -> Result<Option<CachedItem>>;

    /// Deletes every expired item and returns how many were removed.
    fn purge(&self) -> Result<usize>;
}

/// Shared handle to any engine usable as a tier or registry entry.
pub type SharedEngine = Arc<dyn CacheTier>;

// == Engine Lock ==
/// Reader/writer lock with in-place upgrade.
///
/// Many readers may hold the lock at once, or one writer. An upgradable read
/// coexists with plain readers but excludes writers and other upgradable
/// readers; its guard is the token that [`EngineLock::upgrade`] consumes to
/// become a writer without releasing the lock in between.
#[derive(Debug, Default)]
pub struct EngineLock<T> {
    inner: RwLock<T>,
}

impl<T> EngineLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Acquires a shared read lock.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Acquires the exclusive write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Begins a read that may later be upgraded to a write.
    pub fn upgradable_read(&self) -> RwLockUpgradableReadGuard<'_, T> {
        self.inner.upgradable_read()
    }

    /// Upgrades a read begun with [`EngineLock::upgradable_read`] to a write.
    pub fn upgrade(guard: RwLockUpgradableReadGuard<'_, T>) -> RwLockWriteGuard<'_, T> {
        RwLockUpgradableReadGuard::upgrade(guard)
    }
}
