//! Keyed membership buckets shared by the component and reference sets.

use std::collections::{BTreeSet, HashMap};

/// Sequence numbers grouped by string key.
///
/// Sequence numbers are handed out in insertion order, so iterating a
/// bucket yields its members in the order they were added. Empty buckets
/// are dropped.
#[derive(Debug, Default)]
pub(crate) struct Buckets {
    buckets: HashMap<String, BTreeSet<u64>>,
}

impl Buckets {
    /// Add `seq` under `key`, returning the bucket's new size.
    pub(crate) fn insert(&mut self, key: &str, seq: u64) -> usize {
        let bucket = self.buckets.entry(key.to_string()).or_default();
        bucket.insert(seq);
        bucket.len()
    }

    /// Remove `seq` from `key`, returning the bucket's new size.
    pub(crate) fn remove(&mut self, key: &str, seq: u64) -> usize {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return 0;
        };
        bucket.remove(&seq);
        let len = bucket.len();
        if len == 0 {
            self.buckets.remove(key);
        }
        len
    }

    /// Snapshot of the members under `key`.
    pub(crate) fn members(&self, key: &str) -> Vec<u64> {
        self.buckets
            .get(key)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, key: &str) -> usize {
        self.buckets.get(key).map_or(0, BTreeSet::len)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }
}
