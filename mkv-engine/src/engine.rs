//! # Storage Engine Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: Abstract the engine behind a trait so the
//!    dispatcher and persistence manager never name a concrete store.
//! 2. **Single Writer, Many Readers**: Lookups may run in parallel; every
//!    mutation is exclusive with all other accessors.
//! 3. **Shared Values**: Values are handed out as `Arc<str>` so reads and
//!    snapshots copy a pointer, not the payload.
//! 4. **Infallible Core**: A missing key is an outcome, not an error, so the
//!    surface returns plain values.

use std::sync::Arc;

use crate::snapshot::Snapshot;

/// Strategy pattern: defines the engine behavior surface for the server.
pub trait KvEngine: Send + Sync {
    /// Returns the value for a key, or `None` if missing.
    fn get(&self, key: &str) -> Option<Arc<str>>;

    /// Looks up every key under one read acquisition, preserving input order.
    fn multi_get(&self, keys: &[String]) -> Vec<Option<Arc<str>>>;

    /// Inserts or replaces a key with the provided value.
    ///
    /// Takes ownership to avoid extra copies on the hot path.
    fn set(&self, key: String, value: String);

    /// Applies every pair under one write acquisition.
    ///
    /// Callers validate the whole batch first; this never applies a prefix.
    fn multi_set(&self, pairs: Vec<(String, String)>);

    /// Removes a key. Returns true if the key existed and was removed.
    fn delete(&self, key: &str) -> bool;

    /// Number of live keys.
    fn len(&self) -> usize;

    /// Returns true when the store holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live key at the instant of the call, in no particular order.
    fn keys(&self) -> Vec<String>;

    /// Copies the whole mapping as of a single instant.
    fn snapshot(&self) -> Snapshot;

    /// Replaces the whole mapping with the snapshot contents.
    fn restore(&self, snapshot: Snapshot);
}
