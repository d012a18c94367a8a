//! Remote Document Store: the single shared JSON document all devices sync
//! through.
//!
//! The store supports exactly two operations: fetch the document under its
//! fixed key, and upsert the whole document. There are no partial updates.
//! Failures are classified once, here at the adapter boundary, into a
//! [`RemoteErrorKind`]. Callers never have to re-parse error text to tell a
//! missing schema from a dropped connection.

mod memory;
mod postgrest;

pub use memory::MemoryRemoteStore;
pub use postgrest::{PostgrestRemoteStore, RemoteConfig};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::SharedDocument;

/// Broad classes of remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteErrorKind {
    /// Connectivity, timeouts, overloaded server; worth retrying later
    Transient,
    /// Access policy is missing or rejects the request
    PermissionDenied,
    /// The backing table or relation has not been provisioned
    SchemaMissing,
    Unknown,
}

impl RemoteErrorKind {
    /// Whether the remote side must be repaired before sync can work
    pub fn needs_repair(self) -> bool {
        matches!(
            self,
            RemoteErrorKind::PermissionDenied | RemoteErrorKind::SchemaMissing
        )
    }
}

/// A classified remote failure carrying the underlying error text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is inferred from its text
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_message(&message),
            message,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn needs_repair(&self) -> bool {
        self.kind.needs_repair()
    }
}

/// Markers signalling an unprovisioned table or relation
const SCHEMA_MARKERS: &[&str] = &[
    "42p01",
    "pgrst205",
    "relation",
    "does not exist",
    "could not find the table",
];

/// Markers signalling an access policy problem
const POLICY_MARKERS: &[&str] = &["42501", "policy", "permission denied"];

/// Markers of plain connectivity trouble
const TRANSIENT_MARKERS: &[&str] = &[
    "network",
    "connection",
    "timeout",
    "timed out",
    "dns",
    "failed to fetch",
    "reset by peer",
    "broken pipe",
];

/// Infer the error kind from free-form error text
pub fn classify_message(message: &str) -> RemoteErrorKind {
    let text = message.to_lowercase();

    if SCHEMA_MARKERS.iter().any(|m| text.contains(m)) {
        RemoteErrorKind::SchemaMissing
    } else if POLICY_MARKERS.iter().any(|m| text.contains(m)) {
        RemoteErrorKind::PermissionDenied
    } else if TRANSIENT_MARKERS.iter().any(|m| text.contains(m)) {
        RemoteErrorKind::Transient
    } else {
        RemoteErrorKind::Unknown
    }
}

/// Fetch/upsert access to the shared document under its fixed key
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the shared document. `Ok(None)` means no row exists yet.
    async fn fetch(&self) -> RemoteResult<Option<SharedDocument>>;

    /// Replace the whole shared document
    async fn upsert(&self, document: &SharedDocument) -> RemoteResult<()>;

    /// Short label for logs
    fn describe(&self) -> String;
}
