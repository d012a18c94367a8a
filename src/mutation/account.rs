//! Account write paths: registration, profile edits, deletion, moderation.

use serde::Deserialize;
use tracing::info;

use super::{require_mentor, Exhausted, MutationError, MutationResult, Mutations, Written};
use crate::model::{
    Account, AccountStatus, PendingChange, ProfileUpdate, Role, SharedDocument, Tracker,
};

/// Input for a new account
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub avatar: String,
}

impl Registration {
    fn into_account(self) -> MutationResult<Account> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(MutationError::InvalidInput(
                "username must not be empty".to_string(),
            ));
        }
        let display_name = match self.display_name.trim() {
            "" => username,
            name => name,
        };
        Ok(Account::register(username, display_name, self.group, self.role).with_avatar(self.avatar))
    }
}

/// Add `account` with an empty tracker unless the username is taken
pub(super) fn insert_account(doc: &mut SharedDocument, account: &Account) -> MutationResult<()> {
    if doc.has_account(&account.username) {
        return Err(MutationError::UsernameTaken(account.username.clone()));
    }
    doc.accounts.push(account.clone());
    doc.activity_records
        .entry(account.username.clone())
        .or_insert_with(Tracker::new);
    Ok(())
}

pub(super) fn edit_profile(
    doc: &mut SharedDocument,
    username: &str,
    update: &ProfileUpdate,
) -> MutationResult<Account> {
    let account = doc
        .account_mut(username)
        .ok_or_else(|| MutationError::AccountNotFound(username.to_string()))?;
    account.apply(update);
    Ok(account.clone())
}

pub(super) fn remove_account(
    doc: &mut SharedDocument,
    actor: &str,
    username: &str,
) -> MutationResult<()> {
    if !doc.has_account(username) {
        return Err(MutationError::AccountNotFound(username.to_string()));
    }
    if actor != username {
        require_mentor(doc, actor)?;
    }
    doc.remove_account(username);
    Ok(())
}

pub(super) fn moderate(
    doc: &mut SharedDocument,
    actor: &str,
    username: &str,
    status: AccountStatus,
) -> MutationResult<Account> {
    require_mentor(doc, actor)?;
    let account = doc
        .account_mut(username)
        .ok_or_else(|| MutationError::AccountNotFound(username.to_string()))?;
    account.status = status;
    Ok(account.clone())
}

impl Mutations {
    /// Create an account and seed its empty tracker.
    ///
    /// The username is checked against every freshly fetched copy of the
    /// document. When the remote cannot be reached within the retry budget the
    /// account is created locally and the outcome is `Offline`; the next
    /// online sync replays it.
    pub async fn register(&self, registration: Registration) -> MutationResult<Written<Account>> {
        let account = registration.into_account()?;
        let change = PendingChange::Register {
            account: account.clone(),
        };

        let written = self
            .apply(
                &self.registration_policy,
                change,
                Exhausted::FallBackToLocal,
                |doc| insert_account(doc, &account).map(|_| account.clone()),
            )
            .await?;

        info!(user = %account.username, offline = written.outcome.is_offline(), "Account registered");
        Ok(written)
    }

    /// Edit display fields of an existing account
    pub async fn update_profile(
        &self,
        username: &str,
        update: ProfileUpdate,
    ) -> MutationResult<Written<Account>> {
        let change = PendingChange::UpdateProfile {
            username: username.to_string(),
            update: update.clone(),
        };
        self.apply(&self.standard_policy, change, Exhausted::Fail, |doc| {
            edit_profile(doc, username, &update)
        })
        .await
    }

    /// Remove an account and its tracker. Users may delete themselves;
    /// mentors may delete anyone.
    pub async fn delete_account(&self, actor: &str, username: &str) -> MutationResult<Written<()>> {
        let change = PendingChange::DeleteAccount {
            actor: actor.to_string(),
            username: username.to_string(),
        };
        let written = self
            .apply(&self.standard_policy, change, Exhausted::Fail, |doc| {
                remove_account(doc, actor, username)
            })
            .await?;

        // Saving the document never drops tracker keys on its own
        self.local.remove_tracker(username)?;
        info!(user = %username, by = %actor, "Account deleted");
        Ok(written)
    }

    /// Moderate an account. Mentors only.
    pub async fn set_status(
        &self,
        actor: &str,
        username: &str,
        status: AccountStatus,
    ) -> MutationResult<Written<Account>> {
        let change = PendingChange::SetStatus {
            actor: actor.to_string(),
            username: username.to_string(),
            status,
        };
        let written = self
            .apply(&self.standard_policy, change, Exhausted::Fail, |doc| {
                moderate(doc, actor, username, status)
            })
            .await?;

        info!(user = %username, by = %actor, ?status, "Account status changed");
        Ok(written)
    }
}
