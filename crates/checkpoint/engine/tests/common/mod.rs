#![allow(dead_code)]

use checkpoint_engine::{DispatchMode, EngineConfig, GateEngine};
use checkpoint_storage::{
    InMemoryCheckpointStorage, InMemorySessionStore, SensorEventStore, SessionStore,
};
use checkpoint_types::{
    DeviceAssignment, FlowId, FlowStep, FlowStepId, Gate, GateEventId, GateId, NewPlateEvent,
    NewWeightEvent, PlateEvent, WeightEvent,
};
use std::sync::Arc;

pub const ENTRY: GateId = GateId::new(1);
pub const EXIT: GateId = GateId::new(2);
pub const INSPECTION: GateId = GateId::new(3);

/// Yard with an entry gate (CAM-1, SCALE-1), an exit gate (CAM-2) and an
/// inspection gate at flow step 2 (CAM-3).
pub fn yard() -> InMemoryCheckpointStorage {
    InMemoryCheckpointStorage::with_topology(
        [
            Gate::new(ENTRY, "G1").entry(),
            Gate::new(EXIT, "G2").exit(),
            Gate::new(INSPECTION, "G3").with_flow_step(FlowStep {
                id: FlowStepId::new(32),
                flow_id: FlowId::new(7),
                sequence: 2,
            }),
        ],
        [
            DeviceAssignment::camera("CAM-1", ENTRY),
            DeviceAssignment::scale("SCALE-1", ENTRY),
            DeviceAssignment::camera("CAM-2", EXIT),
            DeviceAssignment::camera("CAM-3", INSPECTION),
        ],
    )
    .expect("seed topology")
}

pub struct Harness {
    pub engine: GateEngine,
    pub storage: Arc<InMemoryCheckpointStorage>,
}

impl Harness {
    pub fn inline() -> Self {
        Self::with_config(inline_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_sessions(config, Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_sessions(config: EngineConfig, sessions: Arc<dyn SessionStore>) -> Self {
        let storage = Arc::new(yard());
        let engine = GateEngine::new(config, storage.clone(), sessions);
        Self { engine, storage }
    }

    pub async fn record_plate(&self, camera: &str, plate: &str) -> PlateEvent {
        self.storage
            .record_plate_event(NewPlateEvent::new(camera, plate))
            .await
            .expect("record plate")
    }

    pub async fn record_weight(&self, scale: &str, weight: f64) -> WeightEvent {
        self.storage
            .record_weight_event(NewWeightEvent::new(scale, weight))
            .await
            .expect("record weight")
    }

    /// Record a plate reading and correlate it.
    pub async fn plate(&self, camera: &str, plate: &str) -> GateEventId {
        let event = self.record_plate(camera, plate).await;
        self.engine
            .on_plate_detected(&event)
            .await
            .expect("correlate plate")
    }

    /// Record a weight reading and correlate it.
    pub async fn weight(&self, scale: &str, weight: f64) -> GateEventId {
        let event = self.record_weight(scale, weight).await;
        self.engine
            .on_weight_detected(&event)
            .await
            .expect("correlate weight")
    }
}

pub fn inline_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.dispatch.mode = DispatchMode::Inline;
    config
}
