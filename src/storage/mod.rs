//! Local Snapshot Store: the device's last-known copy of the shared state.
//!
//! Everything is stored as JSON values under named keys. There is one key each
//! for the account list, the group list and the shared asset map. Each user's
//! tracker gets its own key, all under a common prefix so they can be
//! enumerated with a prefix scan. Writes made while offline wait in an outbox
//! key until a sync cycle replays them. Absent or unparsable entries are
//! treated as empty containers and are never raised as errors.

mod memory;
mod sled_store;

pub use memory::MemorySnapshotStore;
pub use sled_store::SledSnapshotStore;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::model::{Account, AssetId, PendingChange, SharedDocument, Tracker, Username};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key in store: {0}")]
    InvalidKey(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persisted key names
pub mod keys {
    pub const ACCOUNTS: &str = "ibadah_accounts";
    pub const GROUPS: &str = "ibadah_groups";
    pub const ASSETS: &str = "ibadah_assets";
    pub const OUTBOX: &str = "ibadah_outbox";
    pub const TRACKER_PREFIX: &str = "ibadah_tracker_";

    pub fn tracker(username: &str) -> String {
        format!("{}{}", TRACKER_PREFIX, username)
    }
}

/// Raw key-value persistence on the device
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;

    /// All entries whose key starts with `prefix`, ordered by key
    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory, or [`StorageConfig::MEMORY`]
    pub path: String,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = immediate)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/ibadah.sled".to_string(),
            cache_size: 64 * 1024 * 1024, // 64MB
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    /// Path value selecting a non-persistent in-memory store
    pub const MEMORY: &'static str = ":memory:";

    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path == Self::MEMORY
    }

    /// Open the store this configuration describes
    pub fn open(self) -> StorageResult<Arc<dyn SnapshotStore>> {
        if self.is_memory() {
            Ok(Arc::new(MemorySnapshotStore::new()))
        } else {
            Ok(Arc::new(SledSnapshotStore::open(self)?))
        }
    }
}

/// Typed view over a [`SnapshotStore`]
#[derive(Clone)]
pub struct Snapshot {
    store: Arc<dyn SnapshotStore>,
    /// Serializes read-modify-write of the outbox key
    outbox: Arc<Mutex<()>>,
}

impl Snapshot {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            outbox: Arc::new(Mutex::new(())),
        }
    }

    pub fn load_accounts(&self) -> StorageResult<Vec<Account>> {
        self.read_or_default(keys::ACCOUNTS)
    }

    pub fn save_accounts(&self, accounts: &[Account]) -> StorageResult<()> {
        self.write(keys::ACCOUNTS, &accounts)
    }

    pub fn load_groups(&self) -> StorageResult<Vec<String>> {
        self.read_or_default(keys::GROUPS)
    }

    pub fn save_groups(&self, groups: &[String]) -> StorageResult<()> {
        self.write(keys::GROUPS, &groups)
    }

    pub fn load_assets(&self) -> StorageResult<BTreeMap<AssetId, String>> {
        self.read_or_default(keys::ASSETS)
    }

    pub fn save_assets(&self, assets: &BTreeMap<AssetId, String>) -> StorageResult<()> {
        self.write(keys::ASSETS, assets)
    }

    pub fn load_tracker(&self, username: &str) -> StorageResult<Option<Tracker>> {
        let key = keys::tracker(username);
        match self.store.get(&key)? {
            Some(bytes) => Ok(decode(&key, &bytes)),
            None => Ok(None),
        }
    }

    pub fn save_tracker(&self, username: &str, tracker: &Tracker) -> StorageResult<()> {
        self.write(&keys::tracker(username), tracker)
    }

    pub fn remove_tracker(&self, username: &str) -> StorageResult<()> {
        self.store.remove(&keys::tracker(username))
    }

    /// Every tracker on the device, keyed by username
    pub fn load_all_trackers(&self) -> StorageResult<BTreeMap<Username, Tracker>> {
        let mut trackers = BTreeMap::new();
        for (key, bytes) in self.store.scan_prefix(keys::TRACKER_PREFIX)? {
            let Some(username) = key.strip_prefix(keys::TRACKER_PREFIX) else {
                continue;
            };
            if username.is_empty() {
                continue;
            }
            if let Some(tracker) = decode::<Tracker>(&key, &bytes) {
                trackers.insert(username.to_string(), tracker);
            }
        }
        Ok(trackers)
    }

    /// Reassemble the shared document from local keys
    pub fn load_document(&self) -> StorageResult<SharedDocument> {
        Ok(SharedDocument {
            accounts: self.load_accounts()?,
            activity_records: self.load_all_trackers()?,
            groups: self.load_groups()?,
            shared_assets: self.load_assets()?,
        })
    }

    /// Persist every part of the document. Trackers present locally but
    /// absent from `doc` are left alone; only explicit deletion removes them.
    pub fn save_document(&self, doc: &SharedDocument) -> StorageResult<()> {
        self.save_accounts(&doc.accounts)?;
        self.save_groups(&doc.groups)?;
        self.save_assets(&doc.shared_assets)?;
        for (username, tracker) in &doc.activity_records {
            self.save_tracker(username, tracker)?;
        }
        self.store.flush()
    }

    /// Offline writes not yet accepted by the remote, oldest first
    pub fn load_pending(&self) -> StorageResult<Vec<PendingChange>> {
        self.read_or_default(keys::OUTBOX)
    }

    pub fn push_pending(&self, change: PendingChange) -> StorageResult<()> {
        let _guard = self.outbox.lock();
        let mut pending = self.load_pending()?;
        pending.push(change);
        self.write(keys::OUTBOX, &pending)?;
        self.store.flush()
    }

    /// Drop the `count` oldest entries. Entries queued after they were
    /// loaded are kept.
    pub fn drop_pending(&self, count: usize) -> StorageResult<()> {
        let _guard = self.outbox.lock();
        let mut pending = self.load_pending()?;
        pending.drain(..count.min(pending.len()));
        if pending.is_empty() {
            self.store.remove(keys::OUTBOX)?;
        } else {
            self.write(keys::OUTBOX, &pending)?;
        }
        self.store.flush()
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.store.flush()
    }

    fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> StorageResult<T> {
        Ok(self
            .store
            .get(key)?
            .and_then(|bytes| decode(key, &bytes))
            .unwrap_or_default())
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, &bytes)
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Ignoring unparsable snapshot entry");
            None
        }
    }
}
