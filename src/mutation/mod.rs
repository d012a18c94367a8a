//! Write paths that change the shared document outside of a sync cycle.
//!
//! Every path is a read-modify-write of the whole document: fetch it fresh,
//! apply the change in memory, upsert it back, and mirror the result into the
//! Local Snapshot Store. Remote failures are retried with jittered backoff.
//! When the device is already known to be offline the network is skipped and
//! the change is applied to the local snapshot only. Every local-only write
//! is also queued as a [`PendingChange`] and replayed by the next online sync.

mod account;
mod retry;
mod shared;

pub use account::Registration;
pub use retry::{read_modify_write, RetryPolicy};

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Account, PendingChange, SharedDocument, Username};
use crate::remote::{RemoteError, RemoteStore};
use crate::storage::{Snapshot, StorageError};
use crate::sync::Connectivity;

/// Errors that can occur on a write path
#[derive(Error, Debug)]
pub enum MutationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Username already taken: {0}")]
    UsernameTaken(Username),

    #[error("Account not found: {0}")]
    AccountNotFound(Username),

    #[error("Account {0} is not allowed to do this")]
    Forbidden(Username),

    #[error("Invalid asset payload: {0}")]
    InvalidAsset(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: RemoteError,
    },

    #[error("Local storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for write paths
pub type MutationResult<T> = Result<T, MutationError>;

/// Where a successful write landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    /// Accepted by the remote document and mirrored locally
    Remote,
    /// Applied to the local snapshot only
    Offline,
}

impl WriteOutcome {
    pub fn is_offline(self) -> bool {
        matches!(self, WriteOutcome::Offline)
    }
}

/// A successful write and the value it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written<T> {
    pub outcome: WriteOutcome,
    pub value: T,
}

/// What to do once the retry budget is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exhausted {
    /// Apply the change to the local snapshot and report `Offline`
    FallBackToLocal,
    /// Surface [`MutationError::RetriesExhausted`]
    Fail,
}

pub struct Mutations {
    remote: Arc<dyn RemoteStore>,
    local: Snapshot,
    connectivity: Connectivity,
    registration_policy: RetryPolicy,
    standard_policy: RetryPolicy,
}

impl Mutations {
    pub fn new(remote: Arc<dyn RemoteStore>, local: Snapshot, connectivity: Connectivity) -> Self {
        Self {
            remote,
            local,
            connectivity,
            registration_policy: RetryPolicy::registration(),
            standard_policy: RetryPolicy::default(),
        }
    }

    /// Apply the same backoff to both policies, keeping their attempt bounds
    pub fn with_backoff(mut self, base_backoff_ms: u64, jitter_ms: u64) -> Self {
        self.registration_policy = self
            .registration_policy
            .with_backoff(base_backoff_ms, jitter_ms);
        self.standard_policy = self.standard_policy.with_backoff(base_backoff_ms, jitter_ms);
        self
    }

    pub fn with_policies(mut self, registration: RetryPolicy, standard: RetryPolicy) -> Self {
        self.registration_policy = registration;
        self.standard_policy = standard;
        self
    }

    async fn apply<T, F>(
        &self,
        policy: &RetryPolicy,
        change: PendingChange,
        exhausted: Exhausted,
        mut mutate: F,
    ) -> MutationResult<Written<T>>
    where
        F: FnMut(&mut SharedDocument) -> MutationResult<T> + Send,
        T: Send,
    {
        let operation = change.label();
        if self.connectivity.is_offline() {
            debug!(operation, "Device offline, writing locally");
            return self.apply_locally(&mut mutate, change);
        }

        match read_modify_write(self.remote.as_ref(), policy, operation, &mut mutate).await {
            Ok((doc, value)) => {
                self.local.save_document(&doc)?;
                Ok(Written {
                    outcome: WriteOutcome::Remote,
                    value,
                })
            }
            Err(MutationError::RetriesExhausted { source, .. })
                if exhausted == Exhausted::FallBackToLocal =>
            {
                warn!(operation, error = %source, "Remote unreachable, keeping the change locally");
                self.apply_locally(&mut mutate, change)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_locally<T, F>(&self, mutate: &mut F, change: PendingChange) -> MutationResult<Written<T>>
    where
        F: FnMut(&mut SharedDocument) -> MutationResult<T>,
    {
        let mut doc = self.local.load_document()?;
        let value = mutate(&mut doc)?;
        self.local.save_document(&doc)?;
        self.local.push_pending(change)?;
        Ok(Written {
            outcome: WriteOutcome::Offline,
            value,
        })
    }
}

/// Redo a queued offline write against a freshly fetched document. The same
/// checks run again, so a change that no longer applies (a username taken in
/// the meantime, a revoked mentor) fails without touching `doc`.
pub fn replay(doc: &mut SharedDocument, change: &PendingChange) -> MutationResult<()> {
    match change {
        PendingChange::Register { account } => account::insert_account(doc, account),
        PendingChange::UpdateProfile { username, update } => {
            account::edit_profile(doc, username, update).map(|_| ())
        }
        PendingChange::DeleteAccount { actor, username } => {
            account::remove_account(doc, actor, username)
        }
        PendingChange::SetStatus {
            actor,
            username,
            status,
        } => account::moderate(doc, actor, username, *status).map(|_| ()),
        PendingChange::UploadAsset { actor, id, payload } => {
            shared::store_asset(doc, actor, id, payload)
        }
        PendingChange::DeleteAsset { actor, id } => shared::drop_asset(doc, actor, id).map(|_| ()),
        PendingChange::UpdateGroups { actor, groups } => {
            shared::replace_groups(doc, actor, groups).map(|_| ())
        }
    }
}

/// Look up `actor` in `doc` and require a privileged role
fn require_mentor<'a>(doc: &'a SharedDocument, actor: &str) -> MutationResult<&'a Account> {
    match doc.account(actor) {
        Some(account) if account.role.is_privileged() => Ok(account),
        _ => Err(MutationError::Forbidden(actor.to_string())),
    }
}
