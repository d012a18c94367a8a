//! Sled-based implementation of the Local Snapshot Store.
//!
//! All snapshot keys live in a single tree. Values are the raw JSON bytes
//! written by [`super::Snapshot`]; this layer never interprets them.

use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

use super::{SnapshotStore, StorageConfig, StorageError, StorageResult};

/// Tree holding every snapshot key
const TREE_SNAPSHOT: &str = "snapshot";

/// Persistent snapshot store backed by Sled
#[derive(Clone)]
pub struct SledSnapshotStore {
    db: Arc<Db>,
    snapshot: Tree,
}

impl SledSnapshotStore {
    /// Open or create a store at the configured path
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let snapshot = db.open_tree(TREE_SNAPSHOT)?;

        Ok(Self {
            db: Arc::new(db),
            snapshot,
        })
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.snapshot.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.snapshot.remove(key.as_bytes())?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.snapshot.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
            entries.push((key, value.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for SledSnapshotStore {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.db.flush();
    }
}
