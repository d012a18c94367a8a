//! Account records shared across all devices of the mentoring group.

use serde::{Deserialize, Serialize};

/// Role of an account within the mentoring group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Mentee,
    Mentor,
}

impl Role {
    /// Privileged accounts may moderate others and manage shared assets
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Mentor)
    }
}

/// Moderation state, owned by mentors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    #[default]
    Pending,
    Rejected,
}

/// A single member of the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique key across the shared document
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub status: AccountStatus,
    /// Avatar reference (asset id or URL)
    #[serde(default)]
    pub avatar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievements: Option<Vec<String>>,
}

impl Account {
    /// Build a freshly registered account. Mentors skip moderation.
    pub fn register(
        username: impl Into<String>,
        display_name: impl Into<String>,
        group: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            group: group.into(),
            role,
            status: if role.is_privileged() {
                AccountStatus::Active
            } else {
                AccountStatus::Pending
            },
            avatar: String::new(),
            bonus_points: None,
            achievements: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = avatar.into();
        self
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    /// Apply a partial profile edit in place
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(display_name) = &update.display_name {
            self.display_name = display_name.clone();
        }
        if let Some(group) = &update.group {
            self.group = group.clone();
        }
        if let Some(avatar) = &update.avatar {
            self.avatar = avatar.clone();
        }
        if let Some(bonus_points) = update.bonus_points {
            self.bonus_points = Some(bonus_points);
        }
        if let Some(achievements) = &update.achievements {
            self.achievements = Some(achievements.clone());
        }
    }
}

/// Fields a profile edit may change. Role and status are not editable here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bonus_points: Option<u32>,
    #[serde(default)]
    pub achievements: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_status_depends_on_role() {
        let mentee = Account::register("aisyah", "Aisyah", "Halaqah A", Role::Mentee);
        assert_eq!(mentee.status, AccountStatus::Pending);

        let mentor = Account::register("ustadz", "Ustadz Hasan", "Halaqah A", Role::Mentor);
        assert_eq!(mentor.status, AccountStatus::Active);
    }

    #[test]
    fn test_profile_update_leaves_unset_fields() {
        let mut account = Account::register("aisyah", "Aisyah", "Halaqah A", Role::Mentee)
            .with_avatar("avatar-1");

        account.apply(&ProfileUpdate {
            avatar: Some("avatar-7".to_string()),
            bonus_points: Some(15),
            ..Default::default()
        });

        assert_eq!(account.avatar, "avatar-7");
        assert_eq!(account.bonus_points, Some(15));
        assert_eq!(account.display_name, "Aisyah");
        assert_eq!(account.group, "Halaqah A");
    }

    #[test]
    fn test_account_wire_format() {
        let json = r#"{
            "username": "budi",
            "displayName": "Budi",
            "group": "Halaqah B",
            "role": "mentor",
            "status": "rejected",
            "avatar": "",
            "achievements": ["first-fast"]
        }"#;

        let account: Account = serde_json::from_str(json).unwrap();
        assert_eq!(account.role, Role::Mentor);
        assert_eq!(account.status, AccountStatus::Rejected);
        assert_eq!(account.bonus_points, None);
        assert_eq!(account.achievements, Some(vec!["first-fast".to_string()]));

        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["displayName"], "Budi");
        assert!(value.get("bonusPoints").is_none());
    }

    #[test]
    fn test_missing_role_and_status_default() {
        let account: Account =
            serde_json::from_str(r#"{"username":"c","displayName":"C"}"#).unwrap();
        assert_eq!(account.role, Role::Mentee);
        assert_eq!(account.status, AccountStatus::Pending);
    }
}
