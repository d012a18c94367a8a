//! Write paths for the mentor-managed parts of the document: shared image
//! assets and the group list.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::info;

use super::{require_mentor, Exhausted, MutationError, MutationResult, Mutations, Written};
use crate::model::{PendingChange, SharedDocument};

/// Check that `payload` is an inline image: `data:image/<type>;base64,<data>`
/// with a decodable, non-empty body
pub fn validate_asset_payload(payload: &str) -> MutationResult<()> {
    let invalid = |reason: &str| Err(MutationError::InvalidAsset(reason.to_string()));

    let Some(rest) = payload.strip_prefix("data:image/") else {
        return invalid("expected a data:image/ URL");
    };
    let Some((media_type, data)) = rest.split_once(";base64,") else {
        return invalid("expected base64 encoding");
    };
    if media_type.is_empty()
        || !media_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return invalid("unrecognized image type");
    }
    match STANDARD.decode(data) {
        Ok(bytes) if !bytes.is_empty() => Ok(()),
        Ok(_) => invalid("empty image data"),
        Err(e) => Err(MutationError::InvalidAsset(e.to_string())),
    }
}

/// Trim names, drop blanks and duplicates, keep first-seen order
fn normalize_groups(groups: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(groups.len());
    for group in groups {
        let group = group.trim();
        if !group.is_empty() && !normalized.iter().any(|g| g == group) {
            normalized.push(group.to_string());
        }
    }
    normalized
}

pub(super) fn store_asset(
    doc: &mut SharedDocument,
    actor: &str,
    id: &str,
    payload: &str,
) -> MutationResult<()> {
    require_mentor(doc, actor)?;
    doc.shared_assets.insert(id.to_string(), payload.to_string());
    Ok(())
}

/// Returns whether the asset existed
pub(super) fn drop_asset(doc: &mut SharedDocument, actor: &str, id: &str) -> MutationResult<bool> {
    require_mentor(doc, actor)?;
    Ok(doc.shared_assets.remove(id).is_some())
}

pub(super) fn replace_groups(
    doc: &mut SharedDocument,
    actor: &str,
    groups: &[String],
) -> MutationResult<Vec<String>> {
    require_mentor(doc, actor)?;
    doc.groups = groups.to_vec();
    Ok(doc.groups.clone())
}

impl Mutations {
    /// Store an inline image under `id`, replacing any previous one
    pub async fn upload_asset(
        &self,
        actor: &str,
        id: &str,
        payload: String,
    ) -> MutationResult<Written<()>> {
        if id.trim().is_empty() {
            return Err(MutationError::InvalidInput(
                "asset id must not be empty".to_string(),
            ));
        }
        validate_asset_payload(&payload)?;

        let change = PendingChange::UploadAsset {
            actor: actor.to_string(),
            id: id.to_string(),
            payload: payload.clone(),
        };
        let written = self
            .apply(&self.standard_policy, change, Exhausted::Fail, |doc| {
                store_asset(doc, actor, id, &payload)
            })
            .await?;

        info!(asset = %id, bytes = payload.len(), by = %actor, "Asset uploaded");
        Ok(written)
    }

    /// Remove an asset. Returns whether it existed.
    pub async fn delete_asset(&self, actor: &str, id: &str) -> MutationResult<Written<bool>> {
        let change = PendingChange::DeleteAsset {
            actor: actor.to_string(),
            id: id.to_string(),
        };
        self.apply(&self.standard_policy, change, Exhausted::Fail, |doc| {
            drop_asset(doc, actor, id)
        })
        .await
    }

    /// Replace the group list
    pub async fn update_groups(
        &self,
        actor: &str,
        groups: Vec<String>,
    ) -> MutationResult<Written<Vec<String>>> {
        let groups = normalize_groups(groups);
        let change = PendingChange::UpdateGroups {
            actor: actor.to_string(),
            groups: groups.clone(),
        };
        self.apply(&self.standard_policy, change, Exhausted::Fail, |doc| {
            replace_groups(doc, actor, &groups)
        })
        .await
    }
}
