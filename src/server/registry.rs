//! Authoritative key table and holder sets.
//!
//! The registry maps each key to a small record: the current entry (if
//! any), the per-key version counter, and the set of clients known to hold
//! a local copy. Each record sits behind its own async mutex so operations
//! on one key serialize while different keys proceed concurrently; the
//! table itself is only locked for the record lookup and never across an
//! await point.
//!
//! Records persist after their entry is removed so the version counter
//! stays monotonic per key across absent periods.

use crate::core::time::Expiry;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Identity a client registered under.
pub type ClientId = String;

/// The authoritative value for one key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Opaque value bytes.
    pub value: Bytes,
    /// Absolute expiry; zero means never.
    pub expiry: Expiry,
    /// Version assigned by the write that produced this entry.
    pub version: u64,
}

/// Per-key record: entry, version counter, holder set.
#[derive(Debug, Default)]
pub struct KeyRecord {
    /// Current entry, `None` while the key is absent.
    pub entry: Option<CacheEntry>,
    /// Clients known to hold a local copy.
    pub holders: HashSet<ClientId>,
    /// Highest version ever assigned for this key.
    pub last_version: u64,
}

impl KeyRecord {
    /// Assign the next version for a write.
    pub fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    /// Current entry if present and unexpired; an expired entry is dropped
    /// and its holders forgotten (their local copies expire on their own
    /// clocks, carrying the same expiry timestamp).
    pub fn live_entry(&mut self, now_ms: u64) -> Option<&CacheEntry> {
        let expired = self
            .entry
            .as_ref()
            .is_some_and(|entry| entry.expiry.is_expired_at(now_ms));
        if expired {
            self.entry = None;
            self.holders.clear();
        }
        self.entry.as_ref()
    }
}

/// One key's slot in the table.
#[derive(Debug, Default)]
pub struct KeyState {
    /// Per-key critical section. Held across the invalidation barrier.
    pub record: tokio::sync::Mutex<KeyRecord>,
}

/// The server-wide key table.
#[derive(Debug, Default)]
pub struct Registry {
    keys: Mutex<HashMap<String, Arc<KeyState>>>,
}

impl Registry {
    /// Record for a key, created on first touch.
    pub fn key_state(&self, key: &str) -> Arc<KeyState> {
        let mut keys = self.keys.lock();
        keys.entry(key.to_string()).or_default().clone()
    }

    /// Record for a key, without creating one.
    pub fn try_key_state(&self, key: &str) -> Option<Arc<KeyState>> {
        self.keys.lock().get(key).cloned()
    }

    /// Number of keys ever touched.
    pub fn key_count(&self) -> usize {
        self.keys.lock().len()
    }

    /// Remove a disconnected client from every holder set.
    ///
    /// Returns the number of keys the client was holding.
    pub async fn purge_client(&self, client_id: &str) -> usize {
        let states: Vec<Arc<KeyState>> = self.keys.lock().values().cloned().collect();
        let mut purged = 0;
        for state in states {
            let mut record = state.record.lock().await;
            if record.holders.remove(client_id) {
                purged += 1;
            }
        }
        purged
    }
}
