//! The Sync Engine: fetch → merge → conditional write → local persist.
//!
//! Network and database failures never escape [`SyncEngine::sync`]. They
//! degrade the cycle to offline mode, where the document is rebuilt from the
//! Local Snapshot Store and any pending change is persisted locally instead of
//! being dropped. Writes queued while offline are replayed onto every freshly
//! fetched document and leave the queue once the remote has accepted them.
//! Only local storage failures are returned as errors.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::merge::{merge_account, merge_tracker, resolve_groups, TrackerMerge};
use super::state::{Connectivity, SyncGate, SyncState};
use super::SyncResult;
use crate::model::{Account, AssetId, SharedDocument, Tracker, Username};
use crate::mutation;
use crate::remote::{RemoteError, RemoteErrorKind, RemoteStore};
use crate::storage::Snapshot;

/// Message reported when offline without a more specific cause
pub const OFFLINE_MESSAGE: &str = "Offline Mode";

/// What the caller currently holds in memory
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub current_user: Option<Account>,
    /// The current user's in-memory tracker
    pub tracker: Option<Tracker>,
    pub groups: Vec<String>,
}

/// Result of one sync cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub accounts: Vec<Account>,
    pub activity_records: BTreeMap<Username, Tracker>,
    pub groups: Vec<String>,
    pub shared_assets: BTreeMap<AssetId, String>,
    /// Newer cloud copy of the caller's tracker, to adopt locally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_local_activity_record: Option<Tracker>,
    /// True when the remote store was reachable for the whole cycle
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RemoteErrorKind>,
    /// Whether the merge changed the document
    pub has_changes: bool,
}

impl SyncReport {
    /// The remote schema or access policy is not provisioned
    pub fn needs_remote_repair(&self) -> bool {
        self.error_kind.is_some_and(RemoteErrorKind::needs_repair)
    }
}

/// Reconciles the local snapshot with the shared remote document
pub struct SyncEngine {
    local: Snapshot,
    remote: Arc<dyn RemoteStore>,
    gate: SyncGate,
    connectivity: Connectivity,
    client_id: String,
}

impl SyncEngine {
    pub fn new(
        local: Snapshot,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            gate: SyncGate::new(),
            connectivity,
            client_id: client_id.into(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.gate.state()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Run a cycle unless one is already in progress
    pub async fn try_sync(&self, request: SyncRequest) -> SyncResult<Option<SyncReport>> {
        let Some(_permit) = self.gate.try_acquire() else {
            debug!(client = %self.client_id, "Sync already in progress, skipping");
            return Ok(None);
        };
        let span = info_span!("sync_cycle", client = %self.client_id);
        self.sync(request).instrument(span).await.map(Some)
    }

    /// Run one full sync cycle. Does not guard against overlapping calls;
    /// use [`SyncEngine::try_sync`] for that.
    pub async fn sync(&self, request: SyncRequest) -> SyncResult<SyncReport> {
        let (mut doc, mut online, mut failure) = match self.remote.fetch().await {
            Ok(Some(doc)) => (doc, true, None),
            Ok(None) => {
                info!(client = %self.client_id, "No shared document yet, starting fresh");
                (SharedDocument::default(), true, None)
            }
            Err(e) => {
                warn!(
                    client = %self.client_id,
                    kind = ?e.kind,
                    error = %e,
                    "Fetch failed, falling back to local snapshot"
                );
                (self.local.load_document()?, false, Some(e))
            }
        };

        let mut dirty = false;
        let mut updated_local = None;

        let pending = if online {
            self.local.load_pending()?
        } else {
            Vec::new()
        };
        for change in &pending {
            match mutation::replay(&mut doc, change) {
                Ok(()) => {
                    debug!(client = %self.client_id, change = change.label(), "Replayed offline write");
                    dirty = true;
                }
                Err(e) => warn!(
                    client = %self.client_id,
                    change = change.label(),
                    error = %e,
                    "Discarding offline write that no longer applies"
                ),
            }
        }

        if let Some(account) = &request.current_user {
            let account_merge = merge_account(&mut doc, account);
            if account_merge.is_change() {
                debug!(user = %account.username, merge = ?account_merge, "Account merged");
                dirty = true;
            }

            if let Some(tracker) = &request.tracker {
                match merge_tracker(&mut doc, &account.username, tracker) {
                    TrackerMerge::LocalWins => {
                        debug!(user = %account.username, "Local tracker is newer");
                        dirty = true;
                    }
                    TrackerMerge::RemoteWins if online => {
                        debug!(user = %account.username, "Cloud tracker is newer");
                        updated_local = doc.activity_records.get(&account.username).cloned();
                    }
                    _ => {}
                }
            }
        }

        if online {
            if dirty {
                if let Err(e) = self.remote.upsert(&doc).await {
                    warn!(client = %self.client_id, kind = ?e.kind, error = %e, "Write failed, keeping changes locally");
                    online = false;
                    failure = Some(e);
                } else {
                    info!(client = %self.client_id, "Shared document updated");
                }
            }
            // Keep the local snapshot at the latest known state for the next offline cycle
            self.local.save_document(&doc)?;
            if online && !pending.is_empty() {
                self.local.drop_pending(pending.len())?;
                info!(client = %self.client_id, count = pending.len(), "Offline writes flushed");
            }
        } else if dirty {
            self.local.save_document(&doc)?;
            info!(client = %self.client_id, "Changes saved locally until the remote is reachable");
        }

        self.connectivity.set_online(online);

        let groups = resolve_groups(&doc.groups, &request.groups);
        let (error_message, error_kind) = describe_failure(online, failure);

        Ok(SyncReport {
            accounts: doc.accounts,
            activity_records: doc.activity_records,
            groups,
            shared_assets: doc.shared_assets,
            updated_local_activity_record: updated_local,
            success: online,
            error_message,
            error_kind,
            has_changes: dirty,
        })
    }
}

fn describe_failure(
    online: bool,
    failure: Option<RemoteError>,
) -> (Option<String>, Option<RemoteErrorKind>) {
    match (online, failure) {
        (true, _) => (None, None),
        (false, Some(e)) => (Some(e.message), Some(e.kind)),
        (false, None) => (Some(OFFLINE_MESSAGE.to_string()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountStatus, PendingChange, Role};
    use crate::mutation::{Mutations, Registration};
    use crate::remote::MemoryRemoteStore;
    use crate::storage::MemorySnapshotStore;
    use std::time::Duration;

    struct Harness {
        remote: Arc<MemoryRemoteStore>,
        local: Snapshot,
        engine: SyncEngine,
    }

    fn harness(remote: MemoryRemoteStore) -> Harness {
        let remote = Arc::new(remote);
        let local = Snapshot::new(Arc::new(MemorySnapshotStore::new()));
        let engine = SyncEngine::new(local.clone(), remote.clone(), Connectivity::new(), "test");
        Harness {
            remote,
            local,
            engine,
        }
    }

    fn aisyah() -> Account {
        Account::register("aisyah", "Aisyah", "Halaqah A", Role::Mentee)
    }

    fn request(account: Account, tracker: Tracker) -> SyncRequest {
        SyncRequest {
            current_user: Some(account),
            tracker: Some(tracker),
            groups: vec!["Halaqah A".to_string()],
        }
    }

    #[tokio::test]
    async fn test_fresh_cloud_init() {
        let h = harness(MemoryRemoteStore::new());

        let report = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(report.success);
        assert!(report.error_message.is_none());
        assert!(report.accounts.is_empty());
        assert!(report.activity_records.is_empty());
        assert!(report.shared_assets.is_empty());
        assert!(!report.has_changes);
        assert_eq!(h.remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_first_sync_pushes_user() {
        let h = harness(MemoryRemoteStore::new());
        let tracker = Tracker::new().with_last_updated(10);

        let report = h.engine.sync(request(aisyah(), tracker.clone())).await.unwrap();
        assert!(report.success);
        assert!(report.has_changes);

        let remote = h.remote.document().unwrap();
        assert!(remote.has_account("aisyah"));
        assert_eq!(remote.activity_records["aisyah"], tracker);
    }

    #[tokio::test]
    async fn test_second_sync_is_idempotent() {
        let h = harness(MemoryRemoteStore::new());
        let req = request(aisyah(), Tracker::new().with_last_updated(10));

        let first = h.engine.sync(req.clone()).await.unwrap();
        let second = h.engine.sync(req).await.unwrap();

        assert!(first.has_changes);
        assert!(!second.has_changes);
        assert_eq!(h.remote.write_count(), 1);
        assert_eq!(first.accounts, second.accounts);
        assert_eq!(first.activity_records, second.activity_records);
        assert!(second.updated_local_activity_record.is_none());
    }

    #[tokio::test]
    async fn test_remote_newer_tracker_is_returned() {
        let mut doc = SharedDocument::default();
        doc.accounts.push(aisyah());
        let cloud = Tracker::new().with_last_updated(500);
        doc.activity_records.insert("aisyah".to_string(), cloud.clone());
        let h = harness(MemoryRemoteStore::new().with_document(doc));

        let report = h
            .engine
            .sync(request(aisyah(), Tracker::new().with_last_updated(100)))
            .await
            .unwrap();

        assert_eq!(report.updated_local_activity_record, Some(cloud));
        assert!(!report.has_changes);
        assert_eq!(h.remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_equal_timestamps_leave_both_sides() {
        let mut doc = SharedDocument::default();
        doc.accounts.push(aisyah());
        doc.activity_records
            .insert("aisyah".to_string(), Tracker::new().with_last_updated(100));
        let h = harness(MemoryRemoteStore::new().with_document(doc));

        let report = h
            .engine
            .sync(request(aisyah(), Tracker::new().with_last_updated(100)))
            .await
            .unwrap();
        assert!(report.updated_local_activity_record.is_none());
        assert!(!report.has_changes);
    }

    #[tokio::test]
    async fn test_mentee_status_survives_push() {
        let mut doc = SharedDocument::default();
        doc.accounts
            .push(aisyah().with_status(AccountStatus::Pending).with_avatar("old"));
        let h = harness(MemoryRemoteStore::new().with_document(doc));

        let local = aisyah()
            .with_status(AccountStatus::Active)
            .with_avatar("new");
        let report = h
            .engine
            .sync(request(local, Tracker::new()))
            .await
            .unwrap();

        let written = h.remote.document().unwrap();
        let account = written.account("aisyah").unwrap();
        assert_eq!(account.status, AccountStatus::Pending);
        assert_eq!(account.avatar, "new");
        assert_eq!(report.accounts[0].status, AccountStatus::Pending);
    }

    #[tokio::test]
    async fn test_offline_fallback_persists_changes() {
        let h = harness(MemoryRemoteStore::new());
        h.remote
            .fail_next_fetch(RemoteError::transient("error sending request: connection refused"));
        let tracker = Tracker::new().with_last_updated(77);

        let report = h.engine.sync(request(aisyah(), tracker.clone())).await.unwrap();

        assert!(!report.success);
        assert!(report.has_changes);
        assert!(report
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection refused"));
        assert!(!report.needs_remote_repair());
        assert!(h.engine.connectivity().is_offline());

        assert_eq!(h.local.load_tracker("aisyah").unwrap(), Some(tracker));
        assert_eq!(h.local.load_accounts().unwrap().len(), 1);
        assert!(h.remote.document().is_none());
    }

    #[tokio::test]
    async fn test_offline_never_returns_cloud_tracker() {
        let h = harness(MemoryRemoteStore::new());
        h.local
            .save_tracker("aisyah", &Tracker::new().with_last_updated(900))
            .unwrap();
        h.remote.fail_next_fetch(RemoteError::transient("timed out"));

        let report = h
            .engine
            .sync(request(aisyah(), Tracker::new().with_last_updated(100)))
            .await
            .unwrap();
        assert!(!report.success);
        assert!(report.updated_local_activity_record.is_none());
    }

    #[tokio::test]
    async fn test_schema_missing_is_distinct() {
        let h = harness(MemoryRemoteStore::new());
        h.remote.fail_next_fetch(RemoteError::from_message(
            r#"relation "public.app_state" does not exist"#,
        ));

        let report = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(!report.success);
        assert!(report.needs_remote_repair());
        assert_eq!(report.error_kind, Some(RemoteErrorKind::SchemaMissing));
        let message = report.error_message.unwrap();
        assert!(message.contains("does not exist"));
        assert_ne!(message, OFFLINE_MESSAGE);
    }

    #[tokio::test]
    async fn test_failed_write_degrades_to_local() {
        let h = harness(MemoryRemoteStore::new());
        h.remote.fail_next_upsert(RemoteError::from_message(
            "new row violates row-level security policy",
        ));

        let report = h
            .engine
            .sync(request(aisyah(), Tracker::new().with_last_updated(5)))
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.error_kind, Some(RemoteErrorKind::PermissionDenied));
        assert!(h.local.load_tracker("aisyah").unwrap().is_some());
        assert!(h.engine.connectivity().is_offline());
    }

    #[tokio::test]
    async fn test_offline_writes_reach_remote_after_reconnect() {
        let mut doc = SharedDocument::default();
        doc.accounts
            .push(Account::register("ustadz", "Ustadz", "Halaqah A", Role::Mentor));
        doc.accounts.push(aisyah());
        doc.activity_records.insert("aisyah".to_string(), Tracker::new());
        let h = harness(MemoryRemoteStore::new().with_document(doc));
        let mutations = Mutations::new(
            h.remote.clone(),
            h.local.clone(),
            h.engine.connectivity().clone(),
        );

        // Seed the snapshot, then lose the network
        h.engine.sync(SyncRequest::default()).await.unwrap();
        h.remote.fail_next_fetch(RemoteError::transient("connection refused"));
        h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(h.engine.connectivity().is_offline());

        let registration = Registration {
            username: "budi".to_string(),
            display_name: "Budi".to_string(),
            group: "Halaqah A".to_string(),
            role: Role::Mentee,
            avatar: String::new(),
        };
        assert!(mutations.register(registration).await.unwrap().outcome.is_offline());
        let approved = mutations
            .set_status("ustadz", "budi", AccountStatus::Active)
            .await
            .unwrap();
        assert!(approved.outcome.is_offline());
        mutations.delete_account("ustadz", "aisyah").await.unwrap();
        assert!(!h.remote.document().unwrap().has_account("budi"));

        let report = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(report.success);
        assert!(report.has_changes);

        let remote = h.remote.document().unwrap();
        assert_eq!(remote.account("budi").unwrap().status, AccountStatus::Active);
        assert!(remote.activity_records.contains_key("budi"));
        assert!(!remote.has_account("aisyah"));
        assert!(!remote.activity_records.contains_key("aisyah"));

        assert!(h.local.load_pending().unwrap().is_empty());
        assert!(h.local.load_accounts().unwrap().iter().any(|a| a.username == "budi"));
        assert!(h.local.load_tracker("aisyah").unwrap().is_none());

        // Nothing left to replay
        let writes = h.remote.write_count();
        let again = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(!again.has_changes);
        assert_eq!(h.remote.write_count(), writes);
    }

    #[tokio::test]
    async fn test_conflicting_offline_write_is_discarded() {
        let h = harness(MemoryRemoteStore::new());
        let mut taken = SharedDocument::default();
        taken
            .accounts
            .push(Account::register("budi", "Budi (tablet)", "Halaqah A", Role::Mentee));
        h.remote.upsert(&taken).await.unwrap();
        h.local
            .push_pending(PendingChange::Register {
                account: Account::register("budi", "Budi (phone)", "Halaqah A", Role::Mentee),
            })
            .unwrap();

        let report = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(report.success);
        assert!(!report.has_changes);

        let remote = h.remote.document().unwrap();
        assert_eq!(remote.accounts.len(), 1);
        assert_eq!(remote.accounts[0].display_name, "Budi (tablet)");
        assert!(h.local.load_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_outbox() {
        let h = harness(MemoryRemoteStore::new());
        let change = PendingChange::Register {
            account: Account::register("budi", "Budi", "Halaqah A", Role::Mentee),
        };
        h.local.push_pending(change.clone()).unwrap();
        h.remote.fail_next_upsert(RemoteError::transient("timed out"));

        let report = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(!report.success);
        assert_eq!(h.local.load_pending().unwrap(), vec![change]);

        let report = h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(report.success);
        assert!(h.remote.document().unwrap().has_account("budi"));
        assert!(h.local.load_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connectivity_recovers() {
        let h = harness(MemoryRemoteStore::new());
        h.remote.fail_next_fetch(RemoteError::transient("timed out"));

        h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(h.engine.connectivity().is_offline());

        h.engine.sync(SyncRequest::default()).await.unwrap();
        assert!(h.engine.connectivity().is_online());
    }

    #[tokio::test]
    async fn test_longer_remote_group_list_wins() {
        let doc = SharedDocument {
            groups: vec!["A".into(), "B".into(), "C".into()],
            ..Default::default()
        };
        let h = harness(MemoryRemoteStore::new().with_document(doc));

        let report = h
            .engine
            .sync(SyncRequest {
                groups: vec!["A".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.groups.len(), 3);

        let report = h
            .engine
            .sync(SyncRequest {
                groups: vec!["X".into(), "Y".into(), "Z".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.groups, vec!["X".to_string(), "Y".into(), "Z".into()]);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_run_once() {
        let h = harness(MemoryRemoteStore::new().with_latency(Duration::from_millis(20)));

        let (a, b) = tokio::join!(
            h.engine.try_sync(SyncRequest::default()),
            h.engine.try_sync(SyncRequest::default())
        );
        let ran = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|report| report.is_some())
            .count();
        assert_eq!(ran, 1);
        assert_eq!(h.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_try_sync_skips_when_busy() {
        let h = harness(MemoryRemoteStore::new());

        let permit = h.engine.gate.try_acquire().unwrap();
        assert_eq!(h.engine.state(), SyncState::Syncing);
        assert!(h.engine.try_sync(SyncRequest::default()).await.unwrap().is_none());
        assert_eq!(h.remote.fetch_count(), 0);

        drop(permit);
        assert!(h.engine.try_sync(SyncRequest::default()).await.unwrap().is_some());
        assert_eq!(h.engine.state(), SyncState::Idle);
    }
}
