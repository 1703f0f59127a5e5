//! Configuration Module
//!
//! Server settings come from environment variables; the per-context cache
//! layout comes from a YAML document.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{StoreCommands, TieredSettings};
use crate::error::{CacheError, Result};
use crate::replication::ReplicationSettings;

// == Server Config ==
/// HTTP server configuration parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server port
    pub server_port: u16,
    /// Path of the YAML caching configuration
    pub cache_config: String,
}

impl ServerConfig {
    /// Creates a new ServerConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_CONFIG` - Caching configuration file (default: tiercache.yaml)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            cache_config: env::var("CACHE_CONFIG").unwrap_or(defaults.cache_config),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache_config: "tiercache.yaml".to_string(),
        }
    }
}

// == Caching Config ==
/// Which engine serves each context.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachingConfig {
    #[serde(default)]
    pub caches: Vec<CacheDefinition>,
}

/// One context and the engine behind it.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheDefinition {
    #[serde(default)]
    pub context: String,
    /// Seconds between purge sweeps, 0 disables the timer
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl CacheDefinition {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Engine selection, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineConfig {
    Memory,
    Persistent {
        /// File path of the SQLite database, or `:memory:`
        connection: Option<String>,
        #[serde(default)]
        commands: StoreCommands,
    },
    Tiered {
        #[serde(default = "default_memory_limit")]
        available_memory_limit_mb: u64,
        #[serde(default = "default_rebalance_interval")]
        rebalance_interval_secs: u64,
        #[serde(default = "default_eviction_margin")]
        eviction_margin_secs: u64,
        cold: Option<Box<EngineConfig>>,
    },
    Replicating {
        listen: Option<String>,
        #[serde(default)]
        peers: Vec<PeerConfig>,
        #[serde(default = "default_true")]
        propagate_removes: bool,
        #[serde(default = "default_queue_capacity")]
        queue_capacity: usize,
        local: Option<Box<EngineConfig>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub address: Option<String>,
}

fn default_purge_interval() -> u64 {
    60
}

fn default_memory_limit() -> u64 {
    TieredSettings::default().available_memory_limit_mb
}

fn default_rebalance_interval() -> u64 {
    TieredSettings::default().rebalance_interval.as_secs()
}

fn default_eviction_margin() -> u64 {
    TieredSettings::default().eviction_margin.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    ReplicationSettings::default().queue_capacity
}

impl CachingConfig {
    // == Loading ==
    /// Reads and validates the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| CacheError::Configuration(format!("invalid caching config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    // == Validation ==
    /// Checks every required field, failing on the first problem found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for definition in &self.caches {
            let context = definition.context.trim();
            if context.is_empty() {
                return Err(CacheError::Configuration(
                    "cache definition is missing `context`".to_string(),
                ));
            }
            if !seen.insert(context) {
                return Err(CacheError::Configuration(format!(
                    "context `{context}` is configured more than once"
                )));
            }
            definition.engine.validate(context)?;
        }
        Ok(())
    }
}

impl EngineConfig {
    fn validate(&self, context: &str) -> Result<()> {
        let missing = |field: &str, engine: &str| {
            CacheError::Configuration(format!(
                "context `{context}`: {engine} engine requires `{field}`"
            ))
        };

        match self {
            EngineConfig::Memory => Ok(()),
            EngineConfig::Persistent { connection, .. } => match connection {
                Some(connection) if !connection.trim().is_empty() => Ok(()),
                _ => Err(missing("connection", "persistent")),
            },
            EngineConfig::Tiered {
                rebalance_interval_secs,
                cold,
                ..
            } => {
                if *rebalance_interval_secs == 0 {
                    return Err(CacheError::Configuration(format!(
                        "context `{context}`: `rebalance_interval_secs` must be positive"
                    )));
                }
                cold.as_deref()
                    .ok_or_else(|| missing("cold", "tiered"))?
                    .validate(context)
            }
            EngineConfig::Replicating {
                listen,
                peers,
                queue_capacity,
                local,
                ..
            } => {
                match listen {
                    Some(listen) if !listen.trim().is_empty() => {}
                    _ => return Err(missing("listen", "replicating")),
                }
                if peers
                    .iter()
                    .any(|peer| peer.address.as_deref().map_or(true, |a| a.trim().is_empty()))
                {
                    return Err(missing("address", "replicating peer"));
                }
                if *queue_capacity == 0 {
                    return Err(CacheError::Configuration(format!(
                        "context `{context}`: `queue_capacity` must be positive"
                    )));
                }
                local
                    .as_deref()
                    .ok_or_else(|| missing("local", "replicating"))?
                    .validate(context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
caches:
  - context: Sessions
    type: memory
    purge_interval_secs: 30
  - context: Lookups
    type: tiered
    available_memory_limit_mb: 128
    cold:
      type: persistent
      connection: ":memory:"
  - context: Shared
    type: replicating
    listen: 127.0.0.1:7401
    propagate_removes: false
    peers:
      - address: 127.0.0.1:7402
    local:
      type: memory
"#;

    fn config_error(text: &str) -> String {
        match CachingConfig::from_yaml(text) {
            Err(CacheError::Configuration(message)) => message,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache_config, "tiercache.yaml");
    }

    #[test]
    fn test_server_config_from_env_defaults() {
        env::remove_var("SERVER_PORT");
        env::remove_var("CACHE_CONFIG");

        let config = ServerConfig::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache_config, "tiercache.yaml");
    }

    #[test]
    fn test_parse_full_config() {
        let config = CachingConfig::from_yaml(FULL_CONFIG).unwrap();
        assert_eq!(config.caches.len(), 3);

        let sessions = &config.caches[0];
        assert_eq!(sessions.context, "Sessions");
        assert_eq!(sessions.purge_interval(), Duration::from_secs(30));
        assert!(matches!(sessions.engine, EngineConfig::Memory));

        match &config.caches[1].engine {
            EngineConfig::Tiered {
                available_memory_limit_mb,
                rebalance_interval_secs,
                cold,
                ..
            } => {
                assert_eq!(*available_memory_limit_mb, 128);
                assert_eq!(*rebalance_interval_secs, 60);
                assert!(matches!(
                    cold.as_deref(),
                    Some(EngineConfig::Persistent { .. })
                ));
            }
            other => panic!("unexpected engine {other:?}"),
        }
        assert_eq!(config.caches[1].purge_interval_secs, 60);

        match &config.caches[2].engine {
            EngineConfig::Replicating {
                propagate_removes,
                peers,
                ..
            } => {
                assert!(!propagate_removes);
                assert_eq!(peers[0].address.as_deref(), Some("127.0.0.1:7402"));
            }
            other => panic!("unexpected engine {other:?}"),
        }
    }

    #[test]
    fn test_persistent_commands_override() {
        let config = CachingConfig::from_yaml(
            r#"
caches:
  - context: Audit
    type: persistent
    connection: ":memory:"
    commands:
      count: "SELECT COUNT(*) FROM audit_items WHERE context = ?1"
      purge: "DELETE FROM audit_items WHERE context = ?1 AND absolute_expiration <= ?2"
"#,
        )
        .unwrap();

        match &config.caches[0].engine {
            EngineConfig::Persistent { commands, .. } => {
                assert_eq!(
                    commands.count,
                    "SELECT COUNT(*) FROM audit_items WHERE context = ?1"
                );
                assert!(commands.purge.starts_with("DELETE FROM audit_items"));
                // Entries left out keep their defaults
                assert_eq!(commands.delete, StoreCommands::default().delete);
            }
            other => panic!("unexpected engine {other:?}"),
        }
    }

    #[test]
    fn test_missing_context() {
        let message = config_error("caches:\n  - type: memory\n");
        assert!(message.contains("context"));
    }

    #[test]
    fn test_duplicate_context() {
        let message = config_error(
            "caches:\n  - context: A\n    type: memory\n  - context: A\n    type: memory\n",
        );
        assert!(message.contains("more than once"));
    }

    #[test]
    fn test_persistent_requires_connection() {
        let message = config_error("caches:\n  - context: A\n    type: persistent\n");
        assert!(message.contains("connection"));
    }

    #[test]
    fn test_tiered_requires_cold() {
        let message = config_error("caches:\n  - context: A\n    type: tiered\n");
        assert!(message.contains("cold"));
    }

    #[test]
    fn test_replicating_requires_listen_and_peer_address() {
        let message = config_error(
            "caches:\n  - context: A\n    type: replicating\n    local:\n      type: memory\n",
        );
        assert!(message.contains("listen"));

        let message = config_error(
            "caches:\n  - context: A\n    type: replicating\n    listen: 127.0.0.1:0\n    peers:\n      - {}\n    local:\n      type: memory\n",
        );
        assert!(message.contains("address"));
    }

    #[test]
    fn test_unknown_engine_type() {
        let message = config_error("caches:\n  - context: A\n    type: redis\n");
        assert!(message.contains("invalid caching config"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = CachingConfig::load("/nonexistent/tiercache.yaml");
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiercache.yaml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        let config = CachingConfig::load(&path).unwrap();
        assert_eq!(config.caches.len(), 3);
    }
}
