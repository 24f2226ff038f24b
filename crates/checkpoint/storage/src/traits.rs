use crate::StorageResult;
use async_trait::async_trait;
use checkpoint_types::{
    DeviceAssignment, DeviceId, Gate, GateEvent, GateEventId, GateId, NewPermit, NewPlateEvent,
    NewWeightEvent, Permit, PermitAudit, PermitAuditAppend, PermitId, PlateEvent, PlateEventId,
    WeightEvent, WeightEventId,
};
use chrono::{DateTime, Utc};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Read access to the device directory.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Gate binding of a camera or scale. `NotFound` if the device is unassigned.
    async fn device_gate(&self, device_id: &DeviceId) -> StorageResult<DeviceAssignment>;

    /// Number of cameras and scales bound to a gate.
    async fn gate_device_count(&self, gate_id: GateId) -> StorageResult<u32>;
}

/// Read access to the gate/flow topology.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Gate with its flow step resolved.
    async fn gate(&self, gate_id: GateId) -> StorageResult<Option<Gate>>;
}

/// Durable gate-level aggregation windows.
#[async_trait]
pub trait GateEventStore: Send + Sync {
    async fn create_gate_event(
        &self,
        gate_id: GateId,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<GateEvent>;

    async fn get_gate_event(&self, gate_event_id: GateEventId) -> StorageResult<Option<GateEvent>>;

    /// Link a gate event to a permit if it is not linked yet.
    ///
    /// Returns the permit id stored after the call, which differs from
    /// `permit_id` when another writer linked the event first.
    async fn attach_permit(
        &self,
        gate_event_id: GateEventId,
        permit_id: PermitId,
    ) -> StorageResult<PermitId>;

    /// Gate events linked to a permit, oldest first.
    async fn gate_events_for_permit(&self, permit_id: PermitId) -> StorageResult<Vec<GateEvent>>;
}

/// Raw plate and weight readings.
#[async_trait]
pub trait SensorEventStore: Send + Sync {
    async fn record_plate_event(&self, event: NewPlateEvent) -> StorageResult<PlateEvent>;
    async fn record_weight_event(&self, event: NewWeightEvent) -> StorageResult<WeightEvent>;

    async fn get_plate_event(&self, id: PlateEventId) -> StorageResult<Option<PlateEvent>>;
    async fn get_weight_event(&self, id: WeightEventId) -> StorageResult<Option<WeightEvent>>;

    /// Stamp the gate event a plate reading belongs to.
    async fn link_plate_event(
        &self,
        id: PlateEventId,
        gate_event_id: GateEventId,
    ) -> StorageResult<()>;

    /// Stamp the gate event a weight reading belongs to.
    async fn link_weight_event(
        &self,
        id: WeightEventId,
        gate_event_id: GateEventId,
    ) -> StorageResult<()>;

    /// Plate readings of a gate event in arrival order.
    async fn plate_events_for(&self, gate_event_id: GateEventId) -> StorageResult<Vec<PlateEvent>>;

    /// Weight readings of a gate event in arrival order.
    async fn weight_events_for(&self, gate_event_id: GateEventId)
        -> StorageResult<Vec<WeightEvent>>;

    /// Set or clear (`None`) the operator correction of a plate reading.
    async fn correct_plate(
        &self,
        id: PlateEventId,
        corrected: Option<String>,
        corrected_by: Option<String>,
    ) -> StorageResult<PlateEvent>;
}

/// Permit records.
#[async_trait]
pub trait PermitStore: Send + Sync {
    async fn create_permit(&self, permit: NewPermit) -> StorageResult<Permit>;

    async fn get_permit(&self, permit_id: PermitId) -> StorageResult<Option<Permit>>;

    /// Lowest-id open permit whose front or back plate equals any candidate.
    async fn find_open_permit_by_plates(&self, plates: &[String])
        -> StorageResult<Option<Permit>>;

    /// Write back every mutable field of an existing permit.
    async fn save_permit(&self, permit: &Permit) -> StorageResult<()>;

    /// Permits newest-first.
    async fn list_permits(&self, window: QueryWindow) -> StorageResult<Vec<Permit>>;
}

/// Append-only permit audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_permit_audit(&self, entry: PermitAuditAppend) -> StorageResult<PermitAudit>;

    /// Entries of one permit, oldest first.
    async fn list_permit_audit(&self, permit_id: PermitId) -> StorageResult<Vec<PermitAudit>>;
}

/// Unified storage bundle used by the correlation engine.
pub trait CheckpointStorage:
    DeviceDirectory
    + TopologyStore
    + GateEventStore
    + SensorEventStore
    + PermitStore
    + AuditStore
    + Send
    + Sync
{
}

impl<T> CheckpointStorage for T where
    T: DeviceDirectory
        + TopologyStore
        + GateEventStore
        + SensorEventStore
        + PermitStore
        + AuditStore
        + Send
        + Sync
{
}
