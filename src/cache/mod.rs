//! Cache Module
//!
//! Cache engines sharing one contract: volatile in-memory storage, a SQLite
//! backed store, and a hot/cold tiered composite.

mod engine;
mod entry;
mod memory;
mod order;
mod persistent;
mod probe;
mod stats;
mod tiered;


// Re-export public types
pub use engine::{CacheEngine, CacheTier, EngineKind, EngineLock, SharedEngine};
pub use entry::{sliding_deadline, CachedItem, NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION};
pub use memory::InMemoryCache;
pub use order::InsertionOrder;
pub use persistent::{SqliteCache, StoreCommands};
pub use probe::{MemoryProbe, StaticProbe, SystemMemoryProbe};
pub use stats::{CacheStats, StatsRecorder};
pub use tiered::{TieredCache, TieredSettings};
