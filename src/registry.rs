//! Cache Registry
//!
//! Maps context names to engines and exposes a typed facade over them.
//! The mapping is fixed at construction, so lookups need no locking.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::cache::{
    CacheStats, InMemoryCache, SharedEngine, SqliteCache, TieredCache, TieredSettings,
    NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION,
};
use crate::config::{CachingConfig, EngineConfig};
use crate::error::{CacheError, Result};
use crate::replication::{PeerListener, ReplicatingCache, ReplicationSettings};
use crate::tasks::BackgroundTasks;

// == Cache Registry ==
pub struct CacheRegistry {
    engines: HashMap<String, SharedEngine>,
    /// Taken by the first shutdown
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl CacheRegistry {
    pub fn builder() -> CacheRegistryBuilder {
        CacheRegistryBuilder::default()
    }

    // == From Config ==
    /// Builds every configured engine and starts its timers and listeners.
    ///
    /// Composite engines get a single purge timer at the top level; their
    /// purge reaches the inner tiers.
    pub async fn from_config(config: &CachingConfig) -> Result<Self> {
        config.validate()?;

        let mut tasks = BackgroundTasks::new();
        let mut engines = HashMap::new();

        for definition in &config.caches {
            let engine = build_engine(&definition.context, &definition.engine, &mut tasks).await?;
            tasks.spawn_purge_task(&definition.context, engine.clone(), definition.purge_interval());
            info!(
                context = %definition.context,
                kind = %engine.kind(),
                "cache configured"
            );
            engines.insert(definition.context.clone(), engine);
        }

        Ok(Self {
            engines,
            tasks: Mutex::new(Some(tasks)),
        })
    }

    /// Resolves `context` to its engine.
    pub fn engine(&self, context: &str) -> Result<&SharedEngine> {
        self.engines
            .get(context)
            .ok_or_else(|| CacheError::UnknownContext(context.to_string()))
    }

    /// Configured context names, sorted.
    pub fn contexts(&self) -> Vec<&str> {
        let mut contexts: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        contexts.sort_unstable();
        contexts
    }

    // == Add ==
    /// Adds an item that never expires.
    pub fn add<T: Serialize>(&self, context: &str, key: &str, value: &T) -> Result<()> {
        self.add_with_expiration(
            context,
            key,
            serde_json::to_value(value)?,
            NO_ABSOLUTE_EXPIRATION,
            NO_SLIDING_EXPIRATION,
        )
    }

    /// Adds an item that expires at `absolute_expiration`.
    pub fn add_with_absolute<T: Serialize>(
        &self,
        context: &str,
        key: &str,
        value: &T,
        absolute_expiration: DateTime<Utc>,
    ) -> Result<()> {
        self.add_with_expiration(
            context,
            key,
            serde_json::to_value(value)?,
            absolute_expiration,
            NO_SLIDING_EXPIRATION,
        )
    }

    /// Adds an item that expires once unread for `sliding_expiration`.
    pub fn add_with_sliding<T: Serialize>(
        &self,
        context: &str,
        key: &str,
        value: &T,
        sliding_expiration: Duration,
    ) -> Result<()> {
        self.add_with_expiration(
            context,
            key,
            serde_json::to_value(value)?,
            NO_ABSOLUTE_EXPIRATION,
            sliding_expiration,
        )
    }

    pub fn add_with_expiration(
        &self,
        context: &str,
        key: &str,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Result<()> {
        self.engine(context)?
            .add(key, value, absolute_expiration, sliding_expiration)
    }

    // == Get ==
    /// Reads and deserializes a value; `None` when missing or expired.
    pub fn get<T: DeserializeOwned>(&self, context: &str, key: &str) -> Result<Option<T>> {
        match self.get_value(context, key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn get_value(&self, context: &str, key: &str) -> Result<Option<serde_json::Value>> {
        self.engine(context)?.get(key)
    }

    pub fn exists(&self, context: &str, key: &str) -> Result<bool> {
        self.engine(context)?.exists(key)
    }

    // == Update ==
    pub fn update<T: Serialize>(&self, context: &str, key: &str, value: &T) -> Result<()> {
        self.update_value(context, key, serde_json::to_value(value)?)
    }

    pub fn update_value(&self, context: &str, key: &str, value: serde_json::Value) -> Result<()> {
        self.engine(context)?.update(key, value)
    }

    // == Remove ==
    pub fn remove(&self, context: &str, key: &str) -> Result<()> {
        self.engine(context)?.remove(key)
    }

    // == Enumerate ==
    /// Iterates over a snapshot of the live keys in `context`.
    pub fn enumerate(&self, context: &str) -> Result<impl Iterator<Item = String>> {
        Ok(self.engine(context)?.keys()?.into_iter())
    }

    pub fn stats(&self, context: &str) -> Result<CacheStats> {
        Ok(self.engine(context)?.stats())
    }

    // == Shutdown ==
    /// Stops every timer and listener, waiting for in-flight sweeps.
    ///
    /// Callable through a shared handle; calls after the first do nothing.
    pub async fn shutdown(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
            info!(contexts = self.engines.len(), "cache registry shut down");
        }
    }
}

// == Builder ==
/// Assembles a registry from engines built by the caller.
///
/// No timers are started; use [`CacheRegistryBuilder::tasks`] to hand over
/// tasks the caller spawned for these engines.
#[derive(Default)]
pub struct CacheRegistryBuilder {
    engines: HashMap<String, SharedEngine>,
    duplicates: Vec<String>,
    tasks: Option<BackgroundTasks>,
}

impl CacheRegistryBuilder {
    pub fn register(mut self, context: impl Into<String>, engine: SharedEngine) -> Self {
        let context = context.into();
        if self.engines.contains_key(&context) {
            self.duplicates.push(context);
        } else {
            self.engines.insert(context, engine);
        }
        self
    }

    /// Tasks to stop when the registry shuts down.
    pub fn tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn build(self) -> Result<CacheRegistry> {
        if let Some(context) = self.duplicates.first() {
            return Err(CacheError::Configuration(format!(
                "context `{context}` is registered more than once"
            )));
        }
        Ok(CacheRegistry {
            engines: self.engines,
            tasks: Mutex::new(Some(self.tasks.unwrap_or_default())),
        })
    }
}

// == Engine Construction ==
type BuildFuture<'a> = Pin<Box<dyn Future<Output = Result<SharedEngine>> + 'a>>;

/// Builds the engine described by `config`, recursing into inner tiers.
fn build_engine<'a>(
    context: &'a str,
    config: &'a EngineConfig,
    tasks: &'a mut BackgroundTasks,
) -> BuildFuture<'a> {
    Box::pin(async move {
        let engine: SharedEngine = match config {
            EngineConfig::Memory => Arc::new(InMemoryCache::new(context)),
            EngineConfig::Persistent {
                connection,
                commands,
            } => {
                let connection = connection.as_deref().ok_or_else(|| {
                    CacheError::Configuration(format!("context `{context}`: missing `connection`"))
                })?;
                Arc::new(SqliteCache::open(context, connection, commands.clone())?)
            }
            EngineConfig::Tiered {
                available_memory_limit_mb,
                rebalance_interval_secs,
                eviction_margin_secs,
                cold,
            } => {
                let cold_config = cold.as_deref().ok_or_else(|| {
                    CacheError::Configuration(format!("context `{context}`: missing `cold`"))
                })?;
                let cold = build_engine(context, cold_config, tasks).await?;
                let settings = TieredSettings {
                    available_memory_limit_mb: *available_memory_limit_mb,
                    rebalance_interval: Duration::from_secs(*rebalance_interval_secs),
                    eviction_margin: Duration::from_secs(*eviction_margin_secs),
                };
                let tiered = Arc::new(TieredCache::new(context, cold, settings));
                tasks.spawn_rebalance_task(context, tiered.clone());
                tiered
            }
            EngineConfig::Replicating {
                listen,
                peers,
                propagate_removes,
                queue_capacity,
                local,
            } => {
                let local_config = local.as_deref().ok_or_else(|| {
                    CacheError::Configuration(format!("context `{context}`: missing `local`"))
                })?;
                let inner = build_engine(context, local_config, tasks).await?;
                let listener = match listen {
                    Some(address) => Some(PeerListener::bind(address.as_str()).await?),
                    None => None,
                };
                let settings = ReplicationSettings {
                    peers: peers.iter().filter_map(|peer| peer.address.clone()).collect(),
                    propagate_removes: *propagate_removes,
                    queue_capacity: *queue_capacity,
                };
                Arc::new(ReplicatingCache::new(context, inner, listener, settings, tasks))
            }
        };
        Ok(engine)
    })
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        visits: u32,
    }

    fn two_memory_contexts() -> CacheRegistry {
        CacheRegistry::builder()
            .register("A", Arc::new(InMemoryCache::new("A")))
            .register("B", Arc::new(InMemoryCache::new("B")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_contexts_are_isolated() {
        let registry = two_memory_contexts();

        registry.add("A", "k", &"v").unwrap();

        assert_eq!(registry.get::<String>("A", "k").unwrap(), Some("v".to_string()));
        assert_eq!(registry.get::<String>("B", "k").unwrap(), None);
        assert_eq!(registry.contexts(), vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_context() {
        let registry = two_memory_contexts();

        assert!(matches!(
            registry.get_value("C", "k"),
            Err(CacheError::UnknownContext(_))
        ));
        assert!(matches!(
            registry.add("C", "k", &1),
            Err(CacheError::UnknownContext(_))
        ));
        assert!(registry.enumerate("C").is_err());
    }

    #[test]
    fn test_typed_round_trip() {
        let registry = two_memory_contexts();
        let session = Session {
            user: "ada".into(),
            visits: 3,
        };

        registry.add("A", "s1", &session).unwrap();
        assert_eq!(registry.get::<Session>("A", "s1").unwrap(), Some(session));

        registry
            .update("A", "s1", &Session { user: "ada".into(), visits: 4 })
            .unwrap();
        let updated: Session = registry.get("A", "s1").unwrap().unwrap();
        assert_eq!(updated.visits, 4);
    }

    #[test]
    fn test_type_mismatch_is_serialization_error() {
        let registry = two_memory_contexts();
        registry.add("A", "n", &42).unwrap();

        assert!(matches!(
            registry.get::<Session>("A", "n"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_duplicate_and_not_found_surface() {
        let registry = two_memory_contexts();
        registry.add("A", "k", &1).unwrap();

        assert!(matches!(
            registry.add("A", "k", &2),
            Err(CacheError::DuplicateKey(_))
        ));
        assert_eq!(registry.get::<i32>("A", "k").unwrap(), Some(1));
        assert!(matches!(
            registry.update("A", "missing", &1),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn test_expiration_helpers() {
        let registry = two_memory_contexts();

        registry
            .add_with_absolute("A", "gone", &1, Utc::now() - TimeDelta::seconds(1))
            .unwrap();
        registry
            .add_with_sliding("A", "kept", &2, Duration::from_secs(3600))
            .unwrap();

        assert!(!registry.exists("A", "gone").unwrap());
        assert_eq!(registry.enumerate("A").unwrap().collect::<Vec<_>>(), vec!["kept"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = two_memory_contexts();
        registry.add("A", "k", &1).unwrap();

        registry.remove("A", "k").unwrap();
        registry.remove("A", "k").unwrap();
        assert_eq!(registry.stats("A").unwrap().total_entries, 0);
    }

    #[test]
    fn test_builder_rejects_duplicate_context() {
        let result = CacheRegistry::builder()
            .register("A", Arc::new(InMemoryCache::new("A")))
            .register("A", Arc::new(InMemoryCache::new("A")))
            .build();

        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_from_config_builds_every_engine() {
        let config = CachingConfig::from_yaml(
            r#"
caches:
  - context: Sessions
    type: memory
  - context: Lookups
    type: tiered
    cold:
      type: persistent
      connection: ":memory:"
  - context: Shared
    type: replicating
    listen: 127.0.0.1:0
    local:
      type: memory
"#,
        )
        .unwrap();

        let registry = CacheRegistry::from_config(&config).await.unwrap();

        assert_eq!(registry.contexts(), vec!["Lookups", "Sessions", "Shared"]);
        assert_eq!(registry.engine("Lookups").unwrap().kind().to_string(), "tiered");
        assert_eq!(registry.engine("Shared").unwrap().kind().to_string(), "replicating");

        registry.add("Lookups", "k", &"v").unwrap();
        assert_eq!(registry.get::<String>("Lookups", "k").unwrap(), Some("v".into()));

        tokio::time::timeout(Duration::from_secs(5), registry.shutdown())
            .await
            .expect("shutdown should finish");
    }

    #[tokio::test]
    async fn test_shutdown_through_shared_handle() {
        let config = CachingConfig::from_yaml(
            "caches:\n  - context: Sessions\n    type: memory\n    purge_interval_secs: 1\n",
        )
        .unwrap();
        let registry = Arc::new(CacheRegistry::from_config(&config).await.unwrap());
        let in_use = Arc::clone(&registry);

        tokio::time::timeout(Duration::from_secs(5), registry.shutdown())
            .await
            .expect("shutdown should finish");
        assert!(registry.tasks.lock().is_none());

        // Second call finds nothing left to stop
        tokio::time::timeout(Duration::from_secs(5), in_use.shutdown())
            .await
            .expect("repeated shutdown should finish");
        assert!(in_use.exists("Sessions", "k").is_ok());
    }
}
