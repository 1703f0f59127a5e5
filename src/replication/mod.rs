//! Replication Module
//!
//! Fans local writes out to peer caches over TCP and applies the writes
//! peers send back.
//!
//! # Wire Format
//! One JSON-encoded [`ReplicationMessage`] per line.

mod listener;
mod message;
mod peer;
mod replicating;

pub use listener::PeerListener;
pub use message::ReplicationMessage;
pub use peer::PeerSender;
pub use replicating::{ReplicatingCache, ReplicationSettings};
