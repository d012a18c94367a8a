//! The in-memory state the UI layer is working with.
//!
//! The session is the account that is logged in on this device, that user's
//! tracker and the group list. Edits are persisted to the Local Snapshot Store
//! immediately. Sync results flow back in through [`SessionStore::apply_report`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Account, DayEntry, Tracker};
use crate::storage::{Snapshot, StorageResult};
use crate::sync::{SyncReport, SyncRequest};

/// What is currently loaded on this device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account: Option<Account>,
    pub tracker: Tracker,
    pub groups: Vec<String>,
}

pub struct SessionStore {
    local: Snapshot,
    current: RwLock<Session>,
    last_report: RwLock<Option<SyncReport>>,
}

impl SessionStore {
    /// Start with no account, restoring the group list from the snapshot
    pub fn new(local: Snapshot) -> StorageResult<Self> {
        let groups = local.load_groups()?;
        Ok(Self {
            local,
            current: RwLock::new(Session {
                groups,
                ..Default::default()
            }),
            last_report: RwLock::new(None),
        })
    }

    /// Log an account in. Without an explicit tracker, the locally stored one
    /// (or a blank grid) is used.
    pub fn begin(
        &self,
        account: Account,
        tracker: Option<Tracker>,
        groups: Option<Vec<String>>,
    ) -> StorageResult<Session> {
        let tracker = match tracker {
            Some(tracker) => tracker,
            None => self
                .local
                .load_tracker(&account.username)?
                .unwrap_or_default(),
        };
        self.local.save_tracker(&account.username, &tracker)?;
        if let Some(groups) = &groups {
            self.local.save_groups(groups)?;
        }

        let mut current = self.current.write();
        current.account = Some(account);
        current.tracker = tracker;
        if let Some(groups) = groups {
            current.groups = groups;
        }
        Ok(current.clone())
    }

    /// Log out, keeping the group list
    pub fn end(&self) {
        let mut current = self.current.write();
        current.account = None;
        current.tracker = Tracker::new();
    }

    pub fn snapshot(&self) -> Session {
        self.current.read().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.current
            .read()
            .account
            .as_ref()
            .map(|a| a.username.clone())
    }

    /// Edit one day of the logged-in user's tracker. Returns `None` when no
    /// one is logged in or the day is outside the grid.
    pub fn edit_day(&self, entry: DayEntry, now_ms: i64) -> StorageResult<Option<Tracker>> {
        let mut current = self.current.write();
        let Some(username) = current.account.as_ref().map(|a| a.username.clone()) else {
            return Ok(None);
        };
        if !current.tracker.set_day(entry, now_ms) {
            return Ok(None);
        }
        self.local.save_tracker(&username, &current.tracker)?;
        Ok(Some(current.tracker.clone()))
    }

    /// Replace the logged-in account's record, e.g. after a profile edit
    pub fn refresh_account(&self, accounts: &[Account]) {
        let mut current = self.current.write();
        let Some(username) = current.account.as_ref().map(|a| a.username.clone()) else {
            return;
        };
        if let Some(fresh) = accounts.iter().find(|a| a.username == username) {
            current.account = Some(fresh.clone());
        }
    }

    /// Replace the group list, e.g. after a mentor edits it
    pub fn set_groups(&self, groups: Vec<String>) -> StorageResult<()> {
        self.local.save_groups(&groups)?;
        self.current.write().groups = groups;
        Ok(())
    }

    /// Input for the next sync cycle
    pub fn sync_request(&self) -> SyncRequest {
        let current = self.current.read();
        SyncRequest {
            current_user: current.account.clone(),
            tracker: current.account.as_ref().map(|_| current.tracker.clone()),
            groups: current.groups.clone(),
        }
    }

    /// Fold a finished sync cycle back into the session
    pub fn apply_report(&self, report: &SyncReport) -> StorageResult<()> {
        {
            let mut current = self.current.write();

            if let Some(username) = current.account.as_ref().map(|a| a.username.clone()) {
                if let Some(fresh) = report.accounts.iter().find(|a| a.username == username) {
                    current.account = Some(fresh.clone());
                }

                // An edit made while the cycle was running is newer still
                if let Some(cloud) = &report.updated_local_activity_record {
                    if cloud.timestamp() > current.tracker.timestamp() {
                        debug!(user = %username, "Adopting newer cloud tracker");
                        current.tracker = cloud.clone();
                        self.local.save_tracker(&username, cloud)?;
                    }
                }
            }

            if current.groups != report.groups {
                current.groups = report.groups.clone();
                self.local.save_groups(&current.groups)?;
            }
        }

        *self.last_report.write() = Some(report.clone());
        Ok(())
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }
}
