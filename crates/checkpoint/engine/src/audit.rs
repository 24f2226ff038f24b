//! Best-effort permit audit trail.

use checkpoint_storage::CheckpointStorage;
use checkpoint_types::{AuditAction, PermitAuditAppend, PermitId};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Actor recorded for mutations made by the correlation engine itself
pub const ENGINE_ACTOR: &str = "engine";

/// Appends audit entries; a failed append is logged and never fails the
/// mutation it describes.
#[derive(Clone)]
pub struct AuditRecorder {
    storage: Arc<dyn CheckpointStorage>,
}

impl AuditRecorder {
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        Self { storage }
    }

    pub async fn record(
        &self,
        permit_id: PermitId,
        action: AuditAction,
        actor: &str,
        changes: Value,
        comment: impl Into<String>,
    ) {
        let entry = PermitAuditAppend {
            permit_id,
            action,
            actor: actor.to_string(),
            changes,
            comment: comment.into(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.storage.append_permit_audit(entry).await {
            tracing::warn!(
                permit_id = %permit_id,
                action = action.as_str(),
                error = %e,
                "Failed to append permit audit"
            );
        }
    }
}
