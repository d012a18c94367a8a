//! Conflict-resolution policy applied while syncing.
//!
//! Accounts merge field-wise with one exception: an unprivileged user's own
//! device can never change its moderation status. Trackers merge as whole
//! records by `lastUpdated` (last write wins); there is no per-day merge.

use crate::model::{Account, SharedDocument, Tracker};

/// What happened to the current user's account in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMerge {
    /// Remote already matched the merged result
    Unchanged,
    /// Remote copy overwritten from local
    Updated,
    /// Account was missing remotely and has been appended
    Appended,
}

impl AccountMerge {
    pub fn is_change(self) -> bool {
        !matches!(self, AccountMerge::Unchanged)
    }
}

/// Merge the local account into the document
pub fn merge_account(doc: &mut SharedDocument, local: &Account) -> AccountMerge {
    let Some(index) = doc
        .accounts
        .iter()
        .position(|a| a.username == local.username)
    else {
        doc.accounts.push(local.clone());
        return AccountMerge::Appended;
    };
    let remote = &mut doc.accounts[index];

    let mut merged = local.clone();
    if !local.role.is_privileged() {
        // Moderation decisions belong to mentors
        merged.status = remote.status;
    }

    if *remote == merged {
        AccountMerge::Unchanged
    } else {
        *remote = merged;
        AccountMerge::Updated
    }
}

/// Outcome of comparing the local tracker against the document's copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMerge {
    /// Same timestamp; nothing to do
    Unchanged,
    /// Local strictly newer (or remote missing); document now holds local
    LocalWins,
    /// Document copy strictly newer; local should adopt it
    RemoteWins,
}

/// Last-write-wins merge of a user's tracker into the document
pub fn merge_tracker(doc: &mut SharedDocument, username: &str, local: &Tracker) -> TrackerMerge {
    let remote = doc.activity_records.get(username).map(Tracker::timestamp);
    match remote {
        Some(remote) if remote > local.timestamp() => TrackerMerge::RemoteWins,
        Some(remote) if remote == local.timestamp() => TrackerMerge::Unchanged,
        // Local strictly newer, or no cloud copy at all. A missing cloud copy
        // is filled even by a local record that was never stamped.
        _ => {
            doc.activity_records
                .insert(username.to_string(), local.clone());
            TrackerMerge::LocalWins
        }
    }
}

/// Group list handed back to the caller: remote wins only if strictly longer.
/// Renames and removals are not handled.
pub fn resolve_groups(remote: &[String], local: &[String]) -> Vec<String> {
    if remote.len() > local.len() {
        remote.to_vec()
    } else {
        local.to_vec()
    }
}
