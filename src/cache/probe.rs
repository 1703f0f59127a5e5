//! Memory Probe Module
//!
//! Reports available system memory to drive tier rebalancing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::System;

use crate::error::{CacheError, Result};

const BYTES_PER_MB: u64 = 1024 * 1024;

// == Memory Probe ==
/// Source of the available-memory reading, in MiB.
pub trait MemoryProbe: Send + Sync {
    fn available_mb(&self) -> Result<u64>;
}

// == System Memory Probe ==
/// Reads available memory from the operating system.
///
/// Environments that do not expose memory metrics (some sandboxes and
/// containers) report a zero total; that is surfaced as
/// [`CacheError::ProbeUnavailable`].
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn available_mb(&self) -> Result<u64> {
        let mut system = self.system.lock();
        system.refresh_memory();

        if system.total_memory() == 0 {
            return Err(CacheError::ProbeUnavailable(
                "system reports no memory metrics".to_string(),
            ));
        }
        Ok(system.available_memory() / BYTES_PER_MB)
    }
}

// == Static Probe ==
/// Probe returning a value set by the caller.
///
/// Lets embedders drive rebalancing from their own memory accounting, and
/// lets tests simulate memory pressure or a missing metric.
#[derive(Debug)]
pub struct StaticProbe {
    available_mb: AtomicU64,
    unavailable: AtomicBool,
}

impl StaticProbe {
    pub fn new(available_mb: u64) -> Self {
        Self {
            available_mb: AtomicU64::new(available_mb),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set(&self, available_mb: u64) {
        self.available_mb.store(available_mb, Ordering::SeqCst);
    }

    /// Makes every subsequent reading fail, or succeed again.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl MemoryProbe for StaticProbe {
    fn available_mb(&self) -> Result<u64> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::ProbeUnavailable("probe disabled".to_string()));
        }
        Ok(self.available_mb.load(Ordering::SeqCst))
    }
}
