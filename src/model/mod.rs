//! Data model for the shared ibadah document.
//!
//! The whole cross-device state lives in one [`SharedDocument`]: every
//! account, every user's 30-day tracker, the group list and the shared image
//! assets. The remote store has no finer granularity, so every remote write
//! replaces the entire aggregate.

mod account;
mod change;
mod tracker;

pub use account::{Account, AccountStatus, ProfileUpdate, Role};
pub use change::PendingChange;
pub use tracker::{DayEntry, Tracker};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Username, the unique account key
pub type Username = String;

/// Identifier of a shared asset slot (e.g. an avatar name)
pub type AssetId = String;

/// The single synchronized aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub accounts: Vec<Account>,
    #[serde(default, deserialize_with = "decode_records")]
    pub activity_records: BTreeMap<Username, Tracker>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub groups: Vec<String>,
    /// Asset id to inline `data:` URL
    #[serde(default, deserialize_with = "null_as_empty")]
    pub shared_assets: BTreeMap<AssetId, String>,
}

/// Treat an explicit `null` sub-collection like a missing one
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode trackers one by one so a single unreadable record is dropped
/// instead of failing the whole document
fn decode_records<'de, D>(deserializer: D) -> Result<BTreeMap<Username, Tracker>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<Username, serde_json::Value> = null_as_empty(deserializer)?;
    let mut records = BTreeMap::new();
    for (username, value) in raw {
        match serde_json::from_value::<Tracker>(value) {
            Ok(tracker) => {
                records.insert(username, tracker);
            }
            Err(e) => warn!(user = %username, error = %e, "Dropping unreadable tracker"),
        }
    }
    Ok(records)
}

impl SharedDocument {
    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.username == username)
    }

    pub fn account_mut(&mut self, username: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.username == username)
    }

    pub fn has_account(&self, username: &str) -> bool {
        self.account(username).is_some()
    }

    /// Remove an account together with its tracker. Returns whether the
    /// account existed.
    pub fn remove_account(&mut self, username: &str) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.username != username);
        self.activity_records.remove(username);
        self.accounts.len() != before
    }
}
