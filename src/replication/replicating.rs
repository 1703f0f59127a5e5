//! Replicating Cache Module
//!
//! Composite engine that mirrors local writes to peer caches.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cache::{CacheEngine, CacheStats, CacheTier, CachedItem, EngineKind, SharedEngine};
use crate::error::Result;
use crate::replication::{PeerListener, PeerSender, ReplicationMessage};
use crate::tasks::BackgroundTasks;

// == Replication Settings ==
#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    /// Peer addresses (`host:port`) receiving local writes
    pub peers: Vec<String>,
    /// Whether a local remove is sent to peers
    pub propagate_removes: bool,
    /// Messages queued per peer before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            propagate_removes: true,
            queue_capacity: 1024,
        }
    }
}

// == Replicating Cache ==
/// Wraps an inner engine and pushes every local Add and Update to peers.
///
/// Local writes complete on the inner engine before anything is sent, and a
/// slow or unreachable peer never fails or delays them. Updates arriving
/// from peers are applied to the inner engine directly, so they are not
/// forwarded again. Replicas converge last-writer-wins.
pub struct ReplicatingCache {
    context: String,
    inner: SharedEngine,
    peers: Vec<PeerSender>,
    propagate_removes: bool,
    listen_addr: Option<SocketAddr>,
}

impl ReplicatingCache {
    // == Constructor ==
    /// Starts serving `listener` (if any) and one sender per configured peer.
    ///
    /// The spawned tasks are registered with `tasks` and stop when it shuts
    /// down. Must be called from within a Tokio runtime.
    pub fn new(
        context: impl Into<String>,
        inner: SharedEngine,
        listener: Option<PeerListener>,
        settings: ReplicationSettings,
        tasks: &mut BackgroundTasks,
    ) -> Self {
        let context = context.into();

        let listen_addr = listener.map(|listener| {
            let address = listener.local_addr();
            tasks.track(listener.serve(inner.clone(), tasks.subscribe()));
            address
        });

        let peers = settings
            .peers
            .iter()
            .map(|address| {
                let (sender, handle) =
                    PeerSender::spawn(address.as_str(), settings.queue_capacity, tasks.subscribe());
                tasks.track(handle);
                sender
            })
            .collect::<Vec<_>>();

        info!(
            context = %context,
            listen = ?listen_addr,
            peers = peers.len(),
            "replication started"
        );

        Self {
            context,
            inner,
            peers,
            propagate_removes: settings.propagate_removes,
            listen_addr,
        }
    }

    pub fn inner(&self) -> &SharedEngine {
        &self.inner
    }

    /// Address the peer listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn peer_addresses(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(PeerSender::address)
    }

    fn broadcast(&self, message: ReplicationMessage) {
        for peer in &self.peers {
            peer.send(message.clone());
        }
    }

    /// Sends the item as currently stored for `key`.
    fn push_item(&self, key: &str) {
        if self.peers.is_empty() {
            return;
        }
        match self.inner.get_item(key) {
            Ok(Some(item)) => self.broadcast(ReplicationMessage::Upsert { item }),
            Ok(None) => {}
            Err(e) => warn!(context = %self.context, key, error = %e, "cannot read item to replicate"),
        }
    }
}

impl CacheEngine for ReplicatingCache {
    fn kind(&self) -> EngineKind {
        EngineKind::Replicating
    }

    fn add(
        &self,
        key: &str,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Result<()> {
        self.inner
            .add(key, value, absolute_expiration, sliding_expiration)?;
        self.push_item(key);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.inner.get(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn update(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.inner.update(key, value)?;
        self.push_item(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)?;
        if self.propagate_removes {
            self.broadcast(ReplicationMessage::Remove {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl CacheTier for ReplicatingCache {
    fn get_item(&self, key: &str) -> Result<Option<CachedItem>> {
        self.inner.get_item(key)
    }

    fn purge(&self) -> Result<usize> {
        self.inner.purge()
    }
}
