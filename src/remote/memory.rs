//! In-process remote document, used for local-only mode and in tests.
//!
//! Failures can be queued to simulate a flaky or unprovisioned backend, and an
//! optional latency widens the window in which concurrent read-modify-write
//! cycles interleave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::model::SharedDocument;

#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    document: Mutex<Option<StoredRow>>,
    fetch_failures: Mutex<VecDeque<RemoteError>>,
    upsert_failures: Mutex<VecDeque<RemoteError>>,
    latency: Duration,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

#[derive(Debug, Clone)]
struct StoredRow {
    data: SharedDocument,
    updated_at: DateTime<Utc>,
}

impl MemoryRemoteStore {
    /// An empty store: the first fetch finds no row
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, document: SharedDocument) -> Self {
        *self.document.lock() = Some(StoredRow {
            data: document,
            updated_at: Utc::now(),
        });
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next fetch fail with `error`
    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.fetch_failures.lock().push_back(error);
    }

    /// Make the next upsert fail with `error`
    pub fn fail_next_upsert(&self, error: RemoteError) {
        self.upsert_failures.lock().push_back(error);
    }

    /// Current stored document, if any row exists
    pub fn document(&self) -> Option<SharedDocument> {
        self.document.lock().as_ref().map(|row| row.data.clone())
    }

    /// Time of the last successful write
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.document.lock().as_ref().map(|row| row.updated_at)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self) -> RemoteResult<Option<SharedDocument>> {
        self.delay().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.fetch_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(self.document())
    }

    async fn upsert(&self, document: &SharedDocument) -> RemoteResult<()> {
        self.delay().await;

        if let Some(error) = self.upsert_failures.lock().pop_front() {
            return Err(error);
        }
        *self.document.lock() = Some(StoredRow {
            data: document.clone(),
            updated_at: Utc::now(),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory document".to_string()
    }
}
