//! Synchronization of the local snapshot with the shared remote document.
//!
//! This module implements the offline-first sync protocol:
//! - Whole-document fetch, merge and conditional write-back
//! - Field-level account merge that protects moderation status
//! - Last-write-wins tracker merge by record timestamp
//! - Local snapshot fallback when the remote is unreachable
//! - A non-reentrant gate and a periodic background task

pub mod engine;
pub mod merge;
pub mod scheduler;
pub mod state;

pub use engine::{SyncEngine, SyncReport, SyncRequest};
pub use scheduler::SyncScheduler;
pub use state::{Connectivity, SyncState};

use std::time::Duration;
use thiserror::Error;

use crate::storage::StorageError;

/// Failures that escape a sync cycle. Remote problems never do; they are
/// reported inside [`SyncReport`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Configuration for sync behavior
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between background sync cycles
    pub interval: Duration,
    /// Identifier of this device in logs
    pub client_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl SyncConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}
