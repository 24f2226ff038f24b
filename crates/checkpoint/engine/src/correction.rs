//! Operator plate corrections.
//!
//! Correcting a plate reading changes its effective plate. The permit its gate
//! event is attached to may still carry the old plate in its front or back
//! slot; those slots are rewritten so later plate matching finds the permit
//! under the corrected value.

use crate::audit::{AuditRecorder, ENGINE_ACTOR};
use crate::lifecycle::{rewrite_plate, ChangeSet};
use crate::{EngineError, EngineResult};
use checkpoint_storage::{CheckpointStorage, StorageError};
use checkpoint_types::{AuditAction, PermitId, PlateEvent, PlateEventId};
use chrono::Utc;
use std::sync::Arc;

/// Outcome of a plate correction
#[derive(Debug, Clone)]
pub struct PlateCorrection {
    /// The reading after the correction was stored
    pub plate_event: PlateEvent,
    /// Permit the reading's gate event is attached to, if any
    pub permit_id: Option<PermitId>,
    /// Slots rewritten on that permit
    pub changes: ChangeSet,
}

pub struct PlateCorrector {
    storage: Arc<dyn CheckpointStorage>,
    audit: AuditRecorder,
}

impl PlateCorrector {
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        let audit = AuditRecorder::new(storage.clone());
        Self { storage, audit }
    }

    /// Store `corrected` on a plate reading and carry it over to its permit.
    ///
    /// A blank correction clears the previous one, so the raw plate becomes
    /// effective again.
    pub async fn correct_plate(
        &self,
        plate_event_id: PlateEventId,
        corrected: &str,
        corrected_by: Option<&str>,
    ) -> EngineResult<PlateCorrection> {
        let before = self
            .storage
            .get_plate_event(plate_event_id)
            .await?
            .ok_or(EngineError::PlateEventNotFound(plate_event_id))?;
        let old_plate = before.effective_plate().to_string();

        let corrected = corrected.trim();
        let plate_event = self
            .storage
            .correct_plate(
                plate_event_id,
                (!corrected.is_empty()).then(|| corrected.to_string()),
                corrected_by.map(str::to_string),
            )
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => EngineError::PlateEventNotFound(plate_event_id),
                other => other.into(),
            })?;
        let new_plate = plate_event.effective_plate().to_string();

        tracing::info!(
            plate_event_id = %plate_event_id,
            from = %old_plate,
            to = %new_plate,
            corrected_by = corrected_by.unwrap_or(ENGINE_ACTOR),
            "Plate reading corrected"
        );

        let permit_id = match plate_event.gate_event_id {
            Some(gate_event_id) => self
                .storage
                .get_gate_event(gate_event_id)
                .await?
                .and_then(|ge| ge.permit_id),
            None => None,
        };
        let Some(permit_id) = permit_id else {
            return Ok(PlateCorrection {
                plate_event,
                permit_id: None,
                changes: ChangeSet::default(),
            });
        };

        let mut permit = self
            .storage
            .get_permit(permit_id)
            .await?
            .ok_or(EngineError::PermitNotFound(permit_id))?;
        let changes = rewrite_plate(&mut permit, &old_plate, &new_plate);

        if !changes.is_empty() {
            permit.last_activity_at = Utc::now();
            if let Err(e) = self.storage.save_permit(&permit).await {
                tracing::error!(
                    plate_event_id = %plate_event_id,
                    permit_id = %permit_id,
                    error = %e,
                    "Failed to persist plate correction"
                );
                return Err(e.into());
            }
            self.audit
                .record(
                    permit_id,
                    AuditAction::CorrectPlate,
                    corrected_by.unwrap_or(ENGINE_ACTOR),
                    serde_json::json!({
                        "plate_event_id": plate_event_id,
                        "from": old_plate,
                        "to": new_plate,
                        "changes": changes.to_json(),
                    }),
                    format!("plate {old_plate} corrected to {new_plate}"),
                )
                .await;
        }

        Ok(PlateCorrection {
            plate_event,
            permit_id: Some(permit_id),
            changes,
        })
    }
}
