//! Cached Item Module
//!
//! Defines a stored value together with its absolute and sliding expiration.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Disables absolute (wall-clock) expiration.
pub const NO_ABSOLUTE_EXPIRATION: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

/// Disables sliding renewal.
pub const NO_SLIDING_EXPIRATION: Duration = Duration::ZERO;

// == Cached Item ==
/// Represents a single cached value and its expiration policy.
///
/// Both expiration fields are always present. When `sliding_expiration` is
/// non-zero every successful read pushes `absolute_expiration` forward to
/// `now + sliding_expiration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedItem {
    /// Identifier, unique within one engine
    pub key: String,
    /// The stored payload
    pub value: serde_json::Value,
    /// Deadline after which the item is gone
    #[serde(with = "epoch_millis")]
    pub absolute_expiration: DateTime<Utc>,
    /// Renewal window applied on each read, zero = none
    pub sliding_expiration: Duration,
}

impl CachedItem {
    // == Constructor ==
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            absolute_expiration,
            sliding_expiration,
        }
    }

    // == Is Expired ==
    /// Checks whether the item has expired at the given instant.
    ///
    /// An item whose deadline equals `now` is already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.absolute_expiration <= now
    }

    /// Checks whether the item has expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns true if reads renew the deadline.
    pub fn has_sliding(&self) -> bool {
        self.sliding_expiration != NO_SLIDING_EXPIRATION
    }

    // == Renew ==
    /// Pushes the deadline to `now + sliding_expiration` if sliding is active.
    pub fn renew_at(&mut self, now: DateTime<Utc>) {
        if self.has_sliding() {
            self.absolute_expiration = sliding_deadline(now, self.sliding_expiration);
        }
    }

    // == Time To Live ==
    /// Returns the time left before the deadline, negative once expired.
    pub fn time_to_live_at(&self, now: DateTime<Utc>) -> TimeDelta {
        self.absolute_expiration.signed_duration_since(now)
    }
}

// == Utility Functions ==
/// Computes `now + window`, saturating at [`NO_ABSOLUTE_EXPIRATION`].
pub fn sliding_deadline(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(NO_ABSOLUTE_EXPIRATION)
}

/// Converts epoch milliseconds back to a deadline.
///
/// Millisecond precision cannot represent [`NO_ABSOLUTE_EXPIRATION`] exactly,
/// so anything at or past it maps back to the sentinel.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    if ms >= NO_ABSOLUTE_EXPIRATION.timestamp_millis() {
        return NO_ABSOLUTE_EXPIRATION;
    }
    DateTime::from_timestamp_millis(ms).unwrap_or(NO_ABSOLUTE_EXPIRATION)
}

mod epoch_millis {
    use super::*;

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(at.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        i64::deserialize(deserializer).map(from_millis)
    }
}
