//! Writes made while the remote was unreachable, kept until they can be
//! replayed onto a fresh copy of the shared document.

use serde::{Deserialize, Serialize};

use super::{Account, AccountStatus, AssetId, ProfileUpdate, Username};

/// One write path invocation, recorded with everything needed to redo it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingChange {
    Register {
        account: Account,
    },
    UpdateProfile {
        username: Username,
        update: ProfileUpdate,
    },
    DeleteAccount {
        actor: Username,
        username: Username,
    },
    SetStatus {
        actor: Username,
        username: Username,
        status: AccountStatus,
    },
    UploadAsset {
        actor: Username,
        id: AssetId,
        payload: String,
    },
    DeleteAsset {
        actor: Username,
        id: AssetId,
    },
    UpdateGroups {
        actor: Username,
        groups: Vec<String>,
    },
}

impl PendingChange {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            PendingChange::Register { .. } => "registration",
            PendingChange::UpdateProfile { .. } => "profile update",
            PendingChange::DeleteAccount { .. } => "account deletion",
            PendingChange::SetStatus { .. } => "moderation",
            PendingChange::UploadAsset { .. } => "asset upload",
            PendingChange::DeleteAsset { .. } => "asset deletion",
            PendingChange::UpdateGroups { .. } => "group update",
        }
    }
}
