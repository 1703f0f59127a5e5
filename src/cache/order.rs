//! Insertion Order Module
//!
//! Remembers the order in which keys entered an in-memory engine.

use std::collections::{BTreeMap, HashMap};

// == Insertion Order ==
/// Tracks key arrival order for oldest-first tier eviction.
///
/// Every push stamps the key with a monotonically increasing sequence
/// number. `arrivals` is ordered by that number (lowest = oldest arrival)
/// and `sequence` maps a key back to its stamp, so push and remove are
/// O(log n) whatever the number of tracked keys.
#[derive(Debug, Default)]
pub struct InsertionOrder {
    /// Keys by arrival sequence
    arrivals: BTreeMap<u64, String>,
    /// Arrival sequence by key
    sequence: HashMap<String, u64>,
    next: u64,
}

impl InsertionOrder {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Push ==
    /// Records a key as the newest arrival.
    ///
    /// A key already tracked is moved to the back.
    pub fn push(&mut self, key: &str) {
        self.remove(key);
        let seq = self.next;
        self.next += 1;
        self.arrivals.insert(seq, key.to_string());
        self.sequence.insert(key.to_string(), seq);
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(seq) = self.sequence.remove(key) {
            self.arrivals.remove(&seq);
        }
    }

    // == Oldest First ==
    /// Iterates keys from oldest to newest arrival.
    pub fn oldest_first(&self) -> impl Iterator<Item = &String> {
        self.arrivals.values()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn keys(order: &InsertionOrder) -> Vec<&str> {
        order.oldest_first().map(String::as_str).collect()
    }

    #[test]
    fn test_order_new() {
        let order = InsertionOrder::new();
        assert!(order.is_empty());
        assert_eq!(order.len(), 0);
    }

    #[test]
    fn test_push_keeps_arrival_order() {
        let mut order = InsertionOrder::new();

        order.push("key1");
        order.push("key2");
        order.push("key3");

        assert_eq!(keys(&order), vec!["key1", "key2", "key3"]);
    }

    #[test]
    fn test_push_existing_key_moves_to_back() {
        let mut order = InsertionOrder::new();

        order.push("a");
        order.push("b");
        order.push("a");

        assert_eq!(order.len(), 2);
        assert_eq!(keys(&order), vec!["b", "a"]);
    }

    #[test]
    fn test_remove() {
        let mut order = InsertionOrder::new();

        order.push("key1");
        order.push("key2");
        order.push("key3");
        order.remove("key2");

        assert_eq!(keys(&order), vec!["key1", "key3"]);
    }

    #[test]
    fn test_remove_nonexistent_key() {
        let mut order = InsertionOrder::new();

        order.push("key1");
        order.remove("nonexistent");

        assert_eq!(keys(&order), vec!["key1"]);
    }

    #[test]
    fn test_remove_then_push_goes_to_back() {
        let mut order = InsertionOrder::new();

        order.push("a");
        order.push("b");
        order.remove("a");
        order.push("c");
        order.push("a");

        assert_eq!(keys(&order), vec!["b", "c", "a"]);
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_remove_many_keeps_order_of_rest() {
        let mut order = InsertionOrder::new();

        for i in 0..10_000 {
            order.push(&format!("key{i}"));
        }
        for i in (0..10_000).filter(|i| i % 2 == 0) {
            order.remove(&format!("key{i}"));
        }

        assert_eq!(order.len(), 5_000);
        let first: Vec<&str> = order.oldest_first().take(3).map(String::as_str).collect();
        assert_eq!(first, vec!["key1", "key3", "key5"]);
    }
}
