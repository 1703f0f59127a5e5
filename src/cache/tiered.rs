//! Tiered Cache Module
//!
//! Composite engine keeping new and recently read items in a volatile hot
//! tier and moving older ones to a cold tier while memory is short.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::engine::{CacheEngine, CacheTier, EngineKind, EngineLock, SharedEngine};
use crate::cache::probe::{MemoryProbe, SystemMemoryProbe};
use crate::cache::{CacheStats, CachedItem, InMemoryCache, StatsRecorder};
use crate::error::{CacheError, Result};

// == Tiered Settings ==
#[derive(Debug, Clone)]
pub struct TieredSettings {
    /// Rebalance demotes items while available memory is below this (MiB)
    pub available_memory_limit_mb: u64,
    /// How often the rebalance timer fires
    pub rebalance_interval: Duration,
    /// Items with less time to live than this stay hot
    pub eviction_margin: Duration,
}

impl Default for TieredSettings {
    fn default() -> Self {
        Self {
            available_memory_limit_mb: 96,
            rebalance_interval: Duration::from_secs(60),
            eviction_margin: Duration::from_secs(60),
        }
    }
}

// == Tiered Cache ==
/// Hot in-memory tier in front of any cold tier.
///
/// An item lives in exactly one tier. New items start hot; a cold hit moves
/// the item back to hot; [`TieredCache::rebalance`] moves hot items to cold,
/// oldest arrival first, while available memory stays under the limit.
///
/// The gate orders the composite's own operations: hot-tier reads share it,
/// operations that touch both tiers hold its upgradable read (exclusive among
/// themselves, shared with readers), and rebalance holds it exclusively.
pub struct TieredCache {
    context: String,
    hot: InMemoryCache,
    cold: SharedEngine,
    settings: TieredSettings,
    probe: Arc<dyn MemoryProbe>,
    gate: EngineLock<()>,
    stats: StatsRecorder,
}

impl TieredCache {
    // == Constructor ==
    /// Creates a tiered cache probing the operating system for memory.
    pub fn new(context: impl Into<String>, cold: SharedEngine, settings: TieredSettings) -> Self {
        Self::with_probe(context, cold, settings, Arc::new(SystemMemoryProbe::new()))
    }

    pub fn with_probe(
        context: impl Into<String>,
        cold: SharedEngine,
        settings: TieredSettings,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let context = context.into();
        Self {
            hot: InMemoryCache::new(context.clone()),
            context,
            cold,
            settings,
            probe,
            gate: EngineLock::new(()),
            stats: StatsRecorder::new(),
        }
    }

    pub fn hot(&self) -> &InMemoryCache {
        &self.hot
    }

    pub fn cold(&self) -> &SharedEngine {
        &self.cold
    }

    pub fn settings(&self) -> &TieredSettings {
        &self.settings
    }

    // == Promote ==
    /// Moves a cold item into the hot tier, keeping its expiration policy.
    /// Caller holds the gate's upgradable read.
    fn promote(&self, item: CachedItem, value: serde_json::Value) -> Result<()> {
        self.hot.add(
            &item.key,
            value,
            item.absolute_expiration,
            item.sliding_expiration,
        )?;
        self.cold.remove(&item.key)?;
        self.stats.record_promotion();
        debug!(context = %self.context, key = %item.key, "promoted item to hot tier");
        Ok(())
    }

    fn under_pressure(&self) -> Result<bool> {
        Ok(self.probe.available_mb()? < self.settings.available_memory_limit_mb)
    }

    // == Rebalance ==
    /// Demotes hot items to the cold tier while memory is under the limit.
    ///
    /// Keys are visited oldest arrival first and memory is re-checked before
    /// each one, stopping as soon as it recovers. Items closer to expiry than
    /// the eviction margin are left to expire in place. A failing probe skips
    /// the cycle.
    ///
    /// Returns the number of demoted items.
    pub fn rebalance(&self) -> Result<usize> {
        match self.under_pressure() {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(e) => {
                warn!(context = %self.context, error = %e, "skipping rebalance");
                return Ok(0);
            }
        }

        let _exclusive = self.gate.write();
        let keys = self.hot.keys_in_order();
        let mut demoted = 0;

        for key in keys {
            match self.under_pressure() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(context = %self.context, error = %e, "memory probe failed mid-rebalance");
                    break;
                }
            }

            let Some(item) = self.hot.get_item(&key)? else {
                continue;
            };

            let keeps_margin = item
                .time_to_live_at(Utc::now())
                .to_std()
                .is_ok_and(|ttl| ttl > self.settings.eviction_margin);
            if !keeps_margin {
                continue;
            }

            match self.cold.add(
                &key,
                item.value.clone(),
                item.absolute_expiration,
                item.sliding_expiration,
            ) {
                Ok(()) => {}
                Err(CacheError::DuplicateKey(_)) => self.cold.update(&key, item.value)?,
                Err(e) => return Err(e),
            }
            self.hot.remove(&key)?;
            self.stats.record_demotion();
            demoted += 1;
        }

        if demoted > 0 {
            info!(context = %self.context, demoted, "moved items to cold tier");
        }
        Ok(demoted)
    }
}

impl CacheEngine for TieredCache {
    fn kind(&self) -> EngineKind {
        EngineKind::Tiered
    }

    /// Inserts into the hot tier; a live key in either tier is a duplicate.
    fn add(
        &self,
        key: &str,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Result<()> {
        let _guard = self.gate.upgradable_read();
        if self.cold.exists(key)? {
            return Err(CacheError::DuplicateKey(key.to_string()));
        }
        self.hot
            .add(key, value, absolute_expiration, sliding_expiration)
    }

    // == Get ==
    /// Reads from hot, falling back to cold. A cold hit is promoted to hot
    /// under the gate, so a concurrent remove cannot interleave with the move.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        {
            let _shared = self.gate.read();
            if let Some(value) = self.hot.get(key)? {
                self.stats.record_hit();
                return Ok(Some(value));
            }
        }

        let _guard = self.gate.upgradable_read();

        // Promoted by another caller while the gate was released
        if let Some(value) = self.hot.get(key)? {
            self.stats.record_hit();
            return Ok(Some(value));
        }

        let now = Utc::now();
        let item = match self.cold.get_item(key)? {
            Some(item) if !item.is_expired_at(now) => item,
            _ => {
                self.stats.record_miss();
                return Ok(None);
            }
        };

        let value = item.value.clone();
        self.promote(item, value)?;
        self.stats.record_hit();
        self.hot.get(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let _shared = self.gate.read();
        Ok(self.hot.exists(key)? || self.cold.exists(key)?)
    }

    // == Update ==
    /// Updates in hot, or promotes a cold item carrying the new value.
    fn update(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let _guard = self.gate.upgradable_read();

        if self.hot.exists(key)? {
            return self.hot.update(key, value);
        }

        match self.cold.get_item(key)? {
            Some(item) if !item.is_expired() => self.promote(item, value),
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.gate.upgradable_read();
        self.hot.remove(key)?;
        self.cold.remove(key)
    }

    /// Hot keys followed by cold keys, read as one snapshot under the gate.
    fn keys(&self) -> Result<Vec<String>> {
        let _shared = self.gate.read();
        let mut keys = self.hot.keys()?;
        keys.extend(self.cold.keys()?);
        Ok(keys)
    }

    fn stats(&self) -> CacheStats {
        // Reads are counted once here, not per tier
        let tiers = self.hot.stats().merge(&self.cold.stats());
        CacheStats {
            purged: tiers.purged,
            ..self.stats.snapshot(tiers.total_entries)
        }
    }
}

impl CacheTier for TieredCache {
    fn get_item(&self, key: &str) -> Result<Option<CachedItem>> {
        let _shared = self.gate.read();
        match self.hot.get_item(key)? {
            Some(item) => Ok(Some(item)),
            None => self.cold.get_item(key),
        }
    }

    fn purge(&self) -> Result<usize> {
        let _guard = self.gate.upgradable_read();
        Ok(self.hot.purge()? + self.cold.purge()?)
    }
}
