//! Replication messages exchanged between peers.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheTier, CachedItem};
use crate::error::{CacheError, Result};

// == Replication Message ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplicationMessage {
    /// The item as stored on the sender after a local Add or Update
    Upsert { item: CachedItem },
    /// The key was removed on the sender
    Remove { key: String },
}

impl ReplicationMessage {
    pub fn key(&self) -> &str {
        match self {
            ReplicationMessage::Upsert { item } => &item.key,
            ReplicationMessage::Remove { key } => key,
        }
    }

    /// Encodes the message as a single newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }

    // == Apply ==
    /// Applies the message to a local engine.
    ///
    /// An upsert updates the key if it exists, otherwise adds it with the
    /// sender's expiration policy. Concurrent local writes to the same key
    /// are resolved by retrying the other operation, so the last message
    /// applied wins. Items that expired in transit are dropped.
    pub fn apply(self, engine: &dyn CacheTier) -> Result<()> {
        match self {
            ReplicationMessage::Upsert { item } => {
                if item.is_expired() {
                    return Ok(());
                }
                match engine.update(&item.key, item.value.clone()) {
                    Err(CacheError::NotFound(_)) => match engine.add(
                        &item.key,
                        item.value.clone(),
                        item.absolute_expiration,
                        item.sliding_expiration,
                    ) {
                        Err(CacheError::DuplicateKey(_)) => engine.update(&item.key, item.value),
                        other => other,
                    },
                    other => other,
                }
            }
            ReplicationMessage::Remove { key } => engine.remove(&key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEngine, InMemoryCache, NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION};
    use chrono::{TimeDelta, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn upsert(key: &str, value: serde_json::Value) -> ReplicationMessage {
        ReplicationMessage::Upsert {
            item: CachedItem::new(key, value, NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION),
        }
    }

    #[test]
    fn test_wire_format_is_one_line() {
        let encoded = upsert("key1", json!({"a": 1})).encode().unwrap();

        assert_eq!(encoded.last(), Some(&b'\n'));
        assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);

        let text = String::from_utf8(encoded).unwrap();
        let decoded = ReplicationMessage::decode(&text).unwrap();
        assert_eq!(decoded.key(), "key1");
        assert!(text.contains(r#""op":"upsert""#));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            ReplicationMessage::decode("not json"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_upsert_adds_missing_key_with_policy() {
        let engine = InMemoryCache::new("test");
        let deadline = Utc::now() + TimeDelta::hours(1);
        let message = ReplicationMessage::Upsert {
            item: CachedItem::new("key1", json!(1), deadline, Duration::from_secs(600)),
        };

        message.apply(&engine).unwrap();

        let item = engine.get_item("key1").unwrap().unwrap();
        assert_eq!(item.value, json!(1));
        assert_eq!(item.sliding_expiration, Duration::from_secs(600));
    }

    #[test]
    fn test_upsert_updates_existing_key() {
        let engine = InMemoryCache::new("test");
        engine
            .add("key1", json!("old"), NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION)
            .unwrap();

        upsert("key1", json!("new")).apply(&engine).unwrap();

        assert_eq!(engine.get("key1").unwrap(), Some(json!("new")));
        assert_eq!(engine.keys().unwrap().len(), 1);
    }

    #[test]
    fn test_expired_upsert_is_dropped() {
        let engine = InMemoryCache::new("test");
        let message = ReplicationMessage::Upsert {
            item: CachedItem::new(
                "key1",
                json!(1),
                Utc::now() - TimeDelta::seconds(1),
                NO_SLIDING_EXPIRATION,
            ),
        };

        message.apply(&engine).unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_remove_message() {
        let engine = InMemoryCache::new("test");
        engine
            .add("key1", json!(1), NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION)
            .unwrap();

        let message = ReplicationMessage::Remove { key: "key1".into() };
        message.clone().apply(&engine).unwrap();
        message.apply(&engine).unwrap();

        assert!(!engine.exists("key1").unwrap());
    }
}
