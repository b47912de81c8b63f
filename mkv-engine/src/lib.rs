pub mod engine;
pub mod memory;
pub mod snapshot;

pub use engine::KvEngine;
pub use memory::MemoryEngine;
pub use snapshot::{Snapshot, SnapshotError, SnapshotFile, SNAPSHOT_VERSION};
