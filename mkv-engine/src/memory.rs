//! # In-Memory Engine
//!
//! One `hashbrown` map behind a `parking_lot::RwLock`.
//!
//! ## Design Principles
//!
//! 1. **Read/Write Split**: Lookups take the shared lock; every mutation,
//!    including batch writes and restores, takes the exclusive lock.
//! 2. **Short Critical Sections**: The lock is held only for map access.
//!    Sorting, serialization, and I/O happen after it is released.
//! 3. **Fast Hashing**: `ahash` keeps string hashing off the profile.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::engine::KvEngine;
use crate::snapshot::Snapshot;

type Map = HashMap<String, Arc<str>, RandomState>;

/// Shared string-to-string store.
pub struct MemoryEngine {
    map: RwLock<Map>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine {
            map: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        MemoryEngine::new()
    }
}

impl KvEngine for MemoryEngine {
    fn get(&self, key: &str) -> Option<Arc<str>> {
        self.map.read().get(key).cloned()
    }

    fn multi_get(&self, keys: &[String]) -> Vec<Option<Arc<str>>> {
        let map = self.map.read();
        keys.iter().map(|key| map.get(key.as_str()).cloned()).collect()
    }

    fn set(&self, key: String, value: String) {
        let value: Arc<str> = Arc::from(value);
        self.map.write().insert(key, value);
    }

    fn multi_set(&self, pairs: Vec<(String, String)>) {
        // Convert before locking so the write section is only inserts.
        let pairs: Vec<(String, Arc<str>)> = pairs
            .into_iter()
            .map(|(key, value)| (key, Arc::from(value)))
            .collect();

        let mut map = self.map.write();
        map.reserve(pairs.len());
        for (key, value) in pairs {
            map.insert(key, value);
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.map.write().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }

    fn snapshot(&self) -> Snapshot {
        let entries: Vec<(String, Arc<str>)> = {
            let map = self.map.read();
            map.iter()
                .map(|(key, value)| (key.clone(), Arc::clone(value)))
                .collect()
        };
        Snapshot::from_entries(entries)
    }

    fn restore(&self, snapshot: Snapshot) {
        let mut fresh = Map::with_capacity_and_hasher(snapshot.len(), RandomState::new());
        fresh.extend(snapshot.into_entries());
        *self.map.write() = fresh;
    }
}
