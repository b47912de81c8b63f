//! # Snapshot Persistence
//!
//! Purpose: Serialize the full mapping to one backing file and read it back
//! at startup.
//!
//! ## Design Principles
//!
//! 1. **Atomic Replace**: Each save writes a temporary file in the target
//!    directory, fsyncs it, then renames it over the backing file. A crash
//!    leaves either the previous generation or the new one on disk.
//! 2. **Self-Describing Format**: The file is a versioned JSON document so an
//!    operator can inspect it and future formats can be detected.
//! 3. **Fail Loudly on Load**: Missing or empty files mean "start empty";
//!    anything unparseable is an error the caller must treat as fatal.
//!
//! ## File Layout
//!
//! ```text
//! {"version":1,"entries":{"alpha":"1","greeting":"hello world"}}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const TEMP_PREFIX: &str = ".mkv-snapshot-";
const TEMP_SUFFIX: &str = ".tmp";

/// Point-in-time copy of the whole mapping.
///
/// Entries are kept sorted so consecutive saves of the same state produce
/// identical files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u32,
    entries: BTreeMap<String, Arc<str>>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Builds a snapshot from key/value pairs.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<str>)>,
    {
        Snapshot {
            version: SNAPSHOT_VERSION,
            entries: entries.into_iter().collect(),
        }
    }

    /// Number of keys captured.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no keys were captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a captured value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|value| &**value)
    }

    /// Iterates captured pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), &**value))
    }

    /// Consumes the snapshot, yielding its pairs in key order.
    pub fn into_entries(self) -> impl Iterator<Item = (String, Arc<str>)> {
        self.entries.into_iter()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::new()
    }
}

/// Errors raised while reading or writing the backing file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error while {context} ({path:?}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot file {path:?} has version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Backing file holding exactly one snapshot generation.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current generation.
    ///
    /// A missing or zero-length file yields an empty snapshot. Temporary files
    /// left by an interrupted save are removed first, so this must not run
    /// while a save to the same directory is in progress.
    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        self.remove_stale_temps();

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "snapshot file missing, starting empty");
                return Ok(Snapshot::new());
            }
            Err(source) => return Err(self.io_error("reading snapshot", source)),
        };

        if bytes.is_empty() {
            debug!(path = ?self.path, "snapshot file empty, starting empty");
            return Ok(Snapshot::new());
        }

        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                path: self.path.clone(),
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        Ok(snapshot)
    }

    /// Atomically replaces the backing file with `snapshot`.
    ///
    /// Returns the number of bytes written.
    pub fn save(&self, snapshot: &Snapshot) -> Result<u64, SnapshotError> {
        let dir = self.parent_dir();
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|source| self.io_error("creating temporary snapshot", source))?;

        {
            let mut writer = BufWriter::new(&mut tmp);
            serde_json::to_writer(&mut writer, snapshot).map_err(SnapshotError::Encode)?;
            writer
                .flush()
                .map_err(|source| self.io_error("writing temporary snapshot", source))?;
        }

        let file = tmp.as_file();
        file.sync_all()
            .map_err(|source| self.io_error("syncing temporary snapshot", source))?;
        let written = file
            .metadata()
            .map_err(|source| self.io_error("inspecting temporary snapshot", source))?
            .len();

        tmp.persist(&self.path)
            .map_err(|err| self.io_error("replacing snapshot file", err.error))?;
        sync_dir(dir);

        Ok(written)
    }

    /// Deletes `.mkv-snapshot-*.tmp` files next to the backing file.
    ///
    /// Returns how many were removed. Failures are logged and skipped.
    pub fn remove_stale_temps(&self) -> usize {
        let dir = self.parent_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = ?dir, error = %err, "cannot scan for stale snapshot temps");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_temp = name
                .to_str()
                .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX));
            if !is_temp {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => debug!(path = ?entry.path(), error = %err, "cannot remove stale snapshot temp"),
            }
        }

        if removed > 0 {
            warn!(dir = ?dir, removed, "removed temporary files from an interrupted save");
        }
        removed
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn io_error(&self, context: &'static str, source: io::Error) -> SnapshotError {
        SnapshotError::Io {
            context,
            path: self.path.clone(),
            source,
        }
    }
}

// Makes the rename itself durable. Failure only widens the crash window.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|handle| handle.sync_all()) {
        debug!(dir = ?dir, error = %err, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
