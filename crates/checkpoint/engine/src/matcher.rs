//! Permit Matcher: attaches a gate event to the permit of the vehicle it saw.
//!
//! Matching runs from durable state only (the gate event, its gate and the
//! readings linked to it), so it can be re-run any number of times for the
//! same gate event. The first rule that identifies a permit wins:
//! 1. the gate event is already linked to a permit
//! 2. an open permit holds any of the event's effective plates
//! 3. the gate is an entry gate and a plate was read, so a permit is opened
//!
//! Otherwise the gate event stays unattached until a later reading in the
//! same window triggers another pass.

use crate::audit::{AuditRecorder, ENGINE_ACTOR};
use crate::lifecycle::{apply_gate_event, opening_permit, ChangeSet, GateObservation};
use crate::{EngineError, EngineResult};
use checkpoint_storage::CheckpointStorage;
use checkpoint_types::{
    plate_candidates, AuditAction, Gate, GateEvent, GateEventId, Permit, PermitId,
};
use chrono::Utc;
use std::sync::Arc;

/// How the permit of a gate event was identified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    /// The gate event was already linked
    Linked,
    /// An open permit held one of the plates
    PlateMatch,
    /// A new permit was opened at an entry gate
    Created,
}

/// Outcome of one resolution pass
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Attached {
        gate_event_id: GateEventId,
        permit_id: PermitId,
        origin: MatchOrigin,
        changes: ChangeSet,
    },
    /// No permit could be identified or created. Not an error.
    Unattached { gate_event_id: GateEventId },
}

impl Resolution {
    pub fn permit_id(&self) -> Option<PermitId> {
        match self {
            Resolution::Attached { permit_id, .. } => Some(*permit_id),
            Resolution::Unattached { .. } => None,
        }
    }
}

pub struct PermitMatcher {
    storage: Arc<dyn CheckpointStorage>,
    audit: AuditRecorder,
}

impl PermitMatcher {
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        let audit = AuditRecorder::new(storage.clone());
        Self { storage, audit }
    }

    /// Identify the permit of a gate event and fold the event into it.
    pub async fn resolve(&self, gate_event_id: GateEventId) -> EngineResult<Resolution> {
        let mut gate_event = self
            .storage
            .get_gate_event(gate_event_id)
            .await?
            .ok_or(EngineError::GateEventNotFound(gate_event_id))?;
        let gate = self
            .storage
            .gate(gate_event.gate_id)
            .await?
            .ok_or(EngineError::GateNotFound(gate_event.gate_id))?;
        let plates = self.storage.plate_events_for(gate_event_id).await?;
        let weights = self.storage.weight_events_for(gate_event_id).await?;
        let candidates = plate_candidates(&plates);

        tracing::debug!(
            gate_event_id = %gate_event_id,
            gate_id = %gate.id,
            plate_events = plates.len(),
            weight_events = weights.len(),
            candidates = ?candidates,
            "Resolving gate event"
        );

        let Some((permit, origin)) = self.identify(&gate_event, &gate, &candidates).await? else {
            tracing::debug!(gate_event_id = %gate_event_id, "No permit identified");
            return Ok(Resolution::Unattached { gate_event_id });
        };

        let opened = (origin == MatchOrigin::Created).then(|| permit.clone());
        let mut permit = match self.link(&mut gate_event, permit).await {
            Ok(permit) => permit,
            Err(e) => {
                if let Some(opened) = &opened {
                    tracing::error!(
                        gate_event_id = %gate_event_id,
                        permit_id = %opened.id,
                        "Opened permit is not linked to any gate event"
                    );
                }
                return Err(e);
            }
        };
        if let Some(opened) = opened {
            self.record_opened(&gate_event, &gate, &opened, &permit).await;
        }

        let now = Utc::now();
        let changes = apply_gate_event(
            &mut permit,
            &GateObservation {
                gate: &gate,
                plate_candidates: &candidates,
                weights: &weights,
            },
            now,
        );

        if !changes.is_empty() {
            permit.last_activity_at = now;
            if let Err(e) = self.storage.save_permit(&permit).await {
                tracing::error!(
                    gate_event_id = %gate_event_id,
                    permit_id = %permit.id,
                    error = %e,
                    "Failed to persist permit changes"
                );
                return Err(e.into());
            }

            let action = if changes.closes_permit() {
                tracing::info!(
                    permit_id = %permit.id,
                    gate_id = %gate.id,
                    "Permit closed"
                );
                AuditAction::Close
            } else {
                AuditAction::Update
            };
            self.audit
                .record(
                    permit.id,
                    action,
                    ENGINE_ACTOR,
                    serde_json::json!({
                        "gate_event_id": gate_event_id,
                        "changes": changes.to_json(),
                    }),
                    format!("gate {}", gate.name),
                )
                .await;
        }

        Ok(Resolution::Attached {
            gate_event_id,
            permit_id: permit.id,
            origin,
            changes,
        })
    }

    async fn identify(
        &self,
        gate_event: &GateEvent,
        gate: &Gate,
        candidates: &[String],
    ) -> EngineResult<Option<(Permit, MatchOrigin)>> {
        if let Some(permit_id) = gate_event.permit_id {
            match self.storage.get_permit(permit_id).await? {
                Some(permit) => return Ok(Some((permit, MatchOrigin::Linked))),
                None => tracing::warn!(
                    gate_event_id = %gate_event.id,
                    permit_id = %permit_id,
                    "Linked permit is missing, matching by plate"
                ),
            }
        }

        if let Some(permit) = self.storage.find_open_permit_by_plates(candidates).await? {
            return Ok(Some((permit, MatchOrigin::PlateMatch)));
        }

        match candidates.first() {
            Some(best_plate) if gate.is_entry => {
                let permit = self
                    .storage
                    .create_permit(opening_permit(gate, best_plate, gate_event.timestamp))
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            gate_event_id = %gate_event.id,
                            plate = %best_plate,
                            error = %e,
                            "Failed to create permit"
                        );
                        e
                    })?;
                tracing::info!(
                    permit_id = %permit.id,
                    gate_event_id = %gate_event.id,
                    plate = %best_plate,
                    "Permit opened"
                );
                Ok(Some((permit, MatchOrigin::Created)))
            }
            _ => Ok(None),
        }
    }

    /// Audit a permit opened by this pass once its gate event points at it.
    async fn record_opened(
        &self,
        gate_event: &GateEvent,
        gate: &Gate,
        opened: &Permit,
        linked: &Permit,
    ) {
        if opened.id != linked.id {
            tracing::error!(
                gate_event_id = %gate_event.id,
                permit_id = %opened.id,
                linked = %linked.id,
                "Opened permit is not linked to any gate event"
            );
            return;
        }
        self.audit
            .record(
                opened.id,
                AuditAction::Create,
                ENGINE_ACTOR,
                serde_json::json!({
                    "gate_event_id": gate_event.id,
                    "plate_front": opened.plate_front,
                    "flow_id": opened.flow_id,
                    "current_step_sequence": opened.current_step_sequence,
                }),
                format!("opened at entry gate {}", gate.name),
            )
            .await;
    }

    /// Link the gate event to `permit` unless it is linked already, and
    /// return the permit the event ends up linked to.
    async fn link(&self, gate_event: &mut GateEvent, permit: Permit) -> EngineResult<Permit> {
        if gate_event.permit_id == Some(permit.id) {
            return Ok(permit);
        }

        let stored = self
            .storage
            .attach_permit(gate_event.id, permit.id)
            .await
            .map_err(|e| {
                tracing::error!(
                    gate_event_id = %gate_event.id,
                    permit_id = %permit.id,
                    error = %e,
                    "Failed to link gate event"
                );
                e
            })?;
        gate_event.permit_id = Some(stored);

        if stored == permit.id {
            return Ok(permit);
        }

        tracing::warn!(
            gate_event_id = %gate_event.id,
            identified = %permit.id,
            linked = %stored,
            "Gate event was linked concurrently, keeping the existing link"
        );
        self.storage
            .get_permit(stored)
            .await?
            .ok_or(EngineError::PermitNotFound(stored))
    }
}
