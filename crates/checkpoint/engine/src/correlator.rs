//! Event Correlator: folds raw sensor readings into gate events.
//!
//! A reading reaches the correlator after ingress has stored it. The
//! correlator maps the reporting device to its gate, joins the gate's current
//! session, links the reading to that session's gate event and schedules a
//! permit resolution pass for it. The link is durable before resolution runs.

use crate::dispatch::ResolutionDispatcher;
use crate::session::GateSessionTracker;
use crate::{EngineError, EngineResult};
use checkpoint_storage::{CheckpointStorage, StorageError};
use checkpoint_types::{DeviceAssignment, DeviceId, GateEventId, PlateEvent, WeightEvent};
use std::sync::Arc;

/// A stored sensor reading awaiting correlation
#[derive(Debug, Clone, Copy)]
enum Reading<'a> {
    Plate(&'a PlateEvent),
    Weight(&'a WeightEvent),
}

impl Reading<'_> {
    fn device(&self) -> &DeviceId {
        match self {
            Reading::Plate(e) => &e.camera_id,
            Reading::Weight(e) => &e.scale_id,
        }
    }

    fn gate_event_id(&self) -> Option<GateEventId> {
        match self {
            Reading::Plate(e) => e.gate_event_id,
            Reading::Weight(e) => e.gate_event_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Reading::Plate(_) => "plate",
            Reading::Weight(_) => "weight",
        }
    }

    fn id(&self) -> i64 {
        match self {
            Reading::Plate(e) => e.id.get(),
            Reading::Weight(e) => e.id.get(),
        }
    }
}

pub struct EventCorrelator {
    storage: Arc<dyn CheckpointStorage>,
    sessions: GateSessionTracker,
    dispatcher: ResolutionDispatcher,
}

impl EventCorrelator {
    pub fn new(
        storage: Arc<dyn CheckpointStorage>,
        sessions: GateSessionTracker,
        dispatcher: ResolutionDispatcher,
    ) -> Self {
        Self {
            storage,
            sessions,
            dispatcher,
        }
    }

    /// Correlate a stored plate reading. Returns the gate event it joined.
    pub async fn on_plate_detected(&self, event: &PlateEvent) -> EngineResult<GateEventId> {
        self.correlate(Reading::Plate(event)).await
    }

    /// Correlate a stored weight reading. Returns the gate event it joined.
    pub async fn on_weight_detected(&self, event: &WeightEvent) -> EngineResult<GateEventId> {
        self.correlate(Reading::Weight(event)).await
    }

    async fn correlate(&self, reading: Reading<'_>) -> EngineResult<GateEventId> {
        // Already linked: the session was consumed when it was linked, only
        // resolution needs to run again.
        if let Some(gate_event_id) = reading.gate_event_id() {
            tracing::debug!(
                kind = reading.kind(),
                event_id = reading.id(),
                gate_event_id = %gate_event_id,
                "Reading already correlated, re-dispatching resolution"
            );
            self.dispatcher.dispatch(gate_event_id).await?;
            return Ok(gate_event_id);
        }

        let assignment = self.assignment(reading).await?;
        let gate_id = assignment.gate_id;
        if self.storage.gate(gate_id).await?.is_none() {
            tracing::warn!(
                device_id = %assignment.device_id,
                gate_id = %gate_id,
                "Device is bound to an unknown gate"
            );
            return Err(EngineError::GateNotFound(gate_id));
        }

        let gate_event_id = self.sessions.acquire_session(gate_id).await?;

        let linked = match reading {
            Reading::Plate(e) => self.storage.link_plate_event(e.id, gate_event_id).await,
            Reading::Weight(e) => self.storage.link_weight_event(e.id, gate_event_id).await,
        };
        if let Err(e) = linked {
            tracing::error!(
                kind = reading.kind(),
                event_id = reading.id(),
                gate_event_id = %gate_event_id,
                error = %e,
                "Failed to link reading to gate event"
            );
            return Err(e.into());
        }

        self.sessions.release_one_device(gate_id).await;

        tracing::info!(
            kind = reading.kind(),
            event_id = reading.id(),
            device_id = %assignment.device_id,
            role = assignment.role.as_str(),
            gate_id = %gate_id,
            gate_event_id = %gate_event_id,
            "Reading correlated"
        );

        self.dispatcher.dispatch(gate_event_id).await?;
        Ok(gate_event_id)
    }

    async fn assignment(&self, reading: Reading<'_>) -> EngineResult<DeviceAssignment> {
        let device_id = reading.device();
        match self.storage.device_gate(device_id).await {
            Ok(assignment) => Ok(assignment),
            Err(StorageError::NotFound(_)) => {
                tracing::warn!(
                    kind = reading.kind(),
                    event_id = reading.id(),
                    device_id = %device_id,
                    "Reading from unassigned device dropped from correlation"
                );
                Err(EngineError::UnassignedDevice(device_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
