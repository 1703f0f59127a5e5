//! Persistent Cache Module
//!
//! Engine backed by a SQLite table keyed by (context, key). Values are stored
//! as serialized blobs; expiration math for purges runs inside the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::engine::{CacheEngine, CacheTier, EngineKind};
use crate::cache::entry::from_millis;
use crate::cache::{sliding_deadline, CacheStats, CachedItem, StatsRecorder};
use crate::error::{CacheError, Result};

// == Store Commands ==
/// Command text for every store operation.
///
/// Parameters are positional:
/// - `insert`: context, key, item, absolute_expiration, sliding_expiration, now
/// - `update` / `touch`: context, key, item / absolute_expiration
/// - `select`, `delete`: context, key
/// - `select_all`, `purge`: context, now
/// - `delete_all`, `count`: context
///
/// Timestamps and durations are milliseconds. `insert` must change zero rows
/// when a live row already holds the key.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreCommands {
    pub schema: String,
    pub insert: String,
    pub update: String,
    pub touch: String,
    pub select: String,
    pub select_all: String,
    pub delete: String,
    pub delete_all: String,
    pub purge: String,
    pub count: String,
}

impl Default for StoreCommands {
    fn default() -> Self {
        Self {
            schema: "CREATE TABLE IF NOT EXISTS cache_items (
                context TEXT NOT NULL,
                key TEXT NOT NULL,
                item BLOB NOT NULL,
                absolute_expiration INTEGER NOT NULL,
                sliding_expiration INTEGER NOT NULL,
                PRIMARY KEY (context, key)
            )"
            .to_string(),
            insert: "INSERT INTO cache_items
                (context, key, item, absolute_expiration, sliding_expiration)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (context, key) DO UPDATE SET
                    item = excluded.item,
                    absolute_expiration = excluded.absolute_expiration,
                    sliding_expiration = excluded.sliding_expiration
                WHERE cache_items.absolute_expiration <= ?6"
                .to_string(),
            update: "UPDATE cache_items SET item = ?3 WHERE context = ?1 AND key = ?2"
                .to_string(),
            touch: "UPDATE cache_items SET absolute_expiration = ?3 WHERE context = ?1 AND key = ?2"
                .to_string(),
            select: "SELECT item, absolute_expiration, sliding_expiration
                FROM cache_items WHERE context = ?1 AND key = ?2"
                .to_string(),
            select_all: "SELECT key FROM cache_items
                WHERE context = ?1 AND absolute_expiration > ?2 ORDER BY rowid"
                .to_string(),
            delete: "DELETE FROM cache_items WHERE context = ?1 AND key = ?2".to_string(),
            delete_all: "DELETE FROM cache_items WHERE context = ?1".to_string(),
            purge: "DELETE FROM cache_items WHERE context = ?1 AND absolute_expiration <= ?2"
                .to_string(),
            count: "SELECT COUNT(*) FROM cache_items WHERE context = ?1".to_string(),
        }
    }
}

// == SQLite Cache ==
/// Engine storing items in SQLite.
///
/// All calls go through one connection behind a mutex, so concurrent callers
/// are serialised on the store round-trip.
pub struct SqliteCache {
    context: String,
    conn: Arc<Mutex<Connection>>,
    commands: StoreCommands,
    stats: StatsRecorder,
}

impl SqliteCache {
    // == Constructor ==
    /// Opens `connection` (a file path or `:memory:`) and starts from a clean
    /// slate for `context`.
    pub fn open(
        context: impl Into<String>,
        connection: &str,
        commands: StoreCommands,
    ) -> Result<Self> {
        let conn = if connection == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection)?
        };
        Self::with_connection(context, Arc::new(Mutex::new(conn)), commands)
    }

    /// Uses an existing shared connection.
    ///
    /// Creates the table if needed, then deletes every row left over for
    /// this context by a previous run.
    pub fn with_connection(
        context: impl Into<String>,
        conn: Arc<Mutex<Connection>>,
        commands: StoreCommands,
    ) -> Result<Self> {
        let cache = Self {
            context: context.into(),
            conn,
            commands,
            stats: StatsRecorder::new(),
        };

        {
            let conn = cache.conn.lock();
            conn.execute_batch(&cache.commands.schema)?;
            let cleared = conn.execute(
                &cache.commands.delete_all,
                rusqlite::params![&cache.context],
            )?;
            if cleared > 0 {
                info!(context = %cache.context, cleared, "cleared stale persistent rows");
            }
        }

        Ok(cache)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &self.commands.count,
            rusqlite::params![&self.context],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

// == Conversions ==
fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl CacheEngine for SqliteCache {
    fn kind(&self) -> EngineKind {
        EngineKind::Persistent
    }

    fn add(
        &self,
        key: &str,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let mut item = CachedItem::new(key, value, absolute_expiration, sliding_expiration);
        item.renew_at(now);
        let blob = serde_json::to_vec(&item.value)?;

        let conn = self.conn.lock();
        let changed = conn.execute(
            &self.commands.insert,
            rusqlite::params![
                &self.context,
                key,
                blob,
                to_millis(item.absolute_expiration),
                duration_to_millis(item.sliding_expiration),
                to_millis(now),
            ],
        )?;

        if changed == 0 {
            return Err(CacheError::DuplicateKey(key.to_string()));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let now = Utc::now();
        let item = match self.get_item(key)? {
            Some(item) if !item.is_expired_at(now) => item,
            _ => {
                self.stats.record_miss();
                return Ok(None);
            }
        };

        if item.has_sliding() {
            let renewed = sliding_deadline(now, item.sliding_expiration);
            let conn = self.conn.lock();
            conn.execute(
                &self.commands.touch,
                rusqlite::params![&self.context, key, to_millis(renewed)],
            )?;
        }

        self.stats.record_hit();
        Ok(Some(item.value))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .get_item(key)?
            .is_some_and(|item| !item.is_expired_at(now)))
    }

    fn update(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let now = Utc::now();
        let blob = serde_json::to_vec(&value)?;

        // Hold the connection across read and write so the pair is atomic
        let conn = self.conn.lock();
        let row = select_row(&conn, &self.commands.select, &self.context, key)?;
        let mut item = match row {
            Some(item) if !item.is_expired_at(now) => item,
            _ => return Err(CacheError::NotFound(key.to_string())),
        };

        conn.execute(
            &self.commands.update,
            rusqlite::params![&self.context, key, blob],
        )?;
        if item.has_sliding() {
            item.renew_at(now);
            conn.execute(
                &self.commands.touch,
                rusqlite::params![&self.context, key, to_millis(item.absolute_expiration)],
            )?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(&self.commands.delete, rusqlite::params![&self.context, key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&self.commands.select_all)?;
        let keys = stmt
            .query_map(
                rusqlite::params![&self.context, to_millis(Utc::now())],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn stats(&self) -> CacheStats {
        let total = self.count().unwrap_or_else(|e| {
            warn!(context = %self.context, error = %e, "failed to count persistent rows");
            0
        });
        self.stats.snapshot(total)
    }
}

impl CacheTier for SqliteCache {
    fn get_item(&self, key: &str) -> Result<Option<CachedItem>> {
        let conn = self.conn.lock();
        select_row(&conn, &self.commands.select, &self.context, key)
    }

    fn purge(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let purged = conn.execute(
            &self.commands.purge,
            rusqlite::params![&self.context, to_millis(Utc::now())],
        )?;
        drop(conn);

        if purged > 0 {
            self.stats.record_purged(purged);
            debug!(context = %self.context, purged, "purged expired rows");
        }
        Ok(purged)
    }
}

fn select_row(
    conn: &Connection,
    sql: &str,
    context: &str,
    key: &str,
) -> Result<Option<CachedItem>> {
    let row = conn
        .query_row(sql, rusqlite::params![context, key], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .optional()?;

    match row {
        Some((blob, absolute, sliding)) => Ok(Some(CachedItem::new(
            key,
            serde_json::from_slice(&blob)?,
            from_millis(absolute),
            Duration::from_millis(sliding.max(0) as u64),
        ))),
        None => Ok(None),
    }
}
