//! Process-local near-cache.
//!
//! The local map is private to the client process. Only two paths mutate
//! it: the public API (put/get/invalidate results) and the protocol engine
//! reacting to server-initiated INVALIDATE. Both go through the same plain
//! mutex, which is never held across an await point, so a fan-out eviction
//! can never deadlock against an in-flight application call.
//!
//! Freshness is represented by presence: an invalidated entry is removed
//! outright, and an entry whose expiry has passed is removed at read time.
//!
//! Stores are epoch-guarded. A caller snapshots the eviction epoch before
//! its server round trip; if any eviction lands before the response value
//! is stored, the store is dropped. Without the guard a fan-out eviction
//! racing the response delivery could be overwritten by the stale value it
//! was meant to remove.

use crate::core::time::Expiry;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A value as seen by the caller of `get`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    /// The value bytes.
    pub value: Bytes,
    /// Version assigned by the server write that produced this value.
    pub version: u64,
    /// Absolute expiry; zero means never.
    pub expiry: Expiry,
}

impl CachedEntry {
    /// The raw value bytes.
    pub fn data(&self) -> &[u8] {
        &self.value
    }
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Bytes,
    expiry: Expiry,
    version: u64,
}

/// The client-side key → value map.
#[derive(Debug, Default)]
pub struct LocalCache {
    map: Mutex<HashMap<String, LocalEntry>>,
    eviction_epoch: AtomicU64,
}

impl LocalCache {
    /// Current eviction epoch. Snapshot before a server round trip and
    /// pass to [`LocalCache::insert`] when the response arrives.
    pub fn epoch(&self) -> u64 {
        self.eviction_epoch.load(Ordering::Acquire)
    }

    /// Store a value received from the server (PUT_ACK or GET_RESULT),
    /// unless an eviction landed after `epoch` was snapshotted. Returns
    /// whether the value was stored.
    pub fn insert(&self, epoch: u64, key: &str, value: Bytes, expiry: Expiry, version: u64) -> bool {
        let mut map = self.map.lock();
        if self.eviction_epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        map.insert(
            key.to_string(),
            LocalEntry {
                value,
                expiry,
                version,
            },
        );
        true
    }

    /// Fresh, unexpired entry for a key. Expired entries are dropped here.
    pub fn get_fresh(&self, key: &str, now_ms: u64) -> Option<CachedEntry> {
        let mut map = self.map.lock();
        match map.get(key) {
            Some(entry) if !entry.expiry.is_expired_at(now_ms) => Some(CachedEntry {
                value: entry.value.clone(),
                version: entry.version,
                expiry: entry.expiry,
            }),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Drop a key. Returns whether anything was there.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut map = self.map.lock();
        self.eviction_epoch.fetch_add(1, Ordering::AcqRel);
        map.remove(key).is_some()
    }

    /// Drop everything. Used on disconnect: once the server can no longer
    /// reach us with invalidations, nothing local can be trusted.
    pub fn clear(&self) {
        let mut map = self.map.lock();
        self.eviction_epoch.fetch_add(1, Ordering::AcqRel);
        map.clear();
    }

    /// Number of locally cached entries.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the local cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_get() {
        let cache = LocalCache::default();
        assert!(cache.insert(cache.epoch(), "k", Bytes::from_static(b"v"), Expiry::NEVER, 3));
        let entry = cache.get_fresh("k", 0).expect("present");
        assert_eq!(entry.data(), b"v");
        assert_eq!(entry.version, 3);
    }

    #[test]
    fn test_expired_entry_dropped_at_read() {
        let cache = LocalCache::default();
        cache.insert(cache.epoch(), "k", Bytes::from_static(b"v"), Expiry::at_millis(100), 1);
        assert!(cache.get_fresh("k", 99).is_some());
        assert!(cache.get_fresh("k", 100).is_none());
        // Gone entirely, not just filtered.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_removes_value() {
        let cache = LocalCache::default();
        cache.insert(cache.epoch(), "k", Bytes::from_static(b"v"), Expiry::NEVER, 1);
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert!(cache.get_fresh("k", 0).is_none());
    }

    #[test]
    fn test_clear() {
        let cache = LocalCache::default();
        cache.insert(cache.epoch(), "a", Bytes::from_static(b"1"), Expiry::NEVER, 1);
        cache.insert(cache.epoch(), "b", Bytes::from_static(b"2"), Expiry::NEVER, 1);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_store_dropped_after_eviction() {
        let cache = LocalCache::default();
        let epoch = cache.epoch();
        // An eviction lands between the epoch snapshot and the store.
        cache.invalidate("k");
        assert!(!cache.insert(epoch, "k", Bytes::from_static(b"stale"), Expiry::NEVER, 1));
        assert!(cache.get_fresh("k", 0).is_none());
    }
}
