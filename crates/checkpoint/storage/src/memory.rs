//! In-memory reference implementation of the checkpoint storage traits.
//!
//! This adapter is deterministic and test-friendly. Production deployments
//! should use a transactional backend (e.g. PostgreSQL) for source-of-truth data.

use crate::traits::{
    AuditStore, DeviceDirectory, GateEventStore, PermitStore, QueryWindow, SensorEventStore,
    TopologyStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use checkpoint_types::{
    DeviceAssignment, DeviceId, Gate, GateEvent, GateEventId, GateId, NewPermit, NewPlateEvent,
    NewWeightEvent, Permit, PermitAudit, PermitAuditAppend, PermitAuditId, PermitId, PlateEvent,
    PlateEventId, WeightEvent, WeightEventId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory checkpoint storage adapter.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStorage {
    gates: RwLock<HashMap<GateId, Gate>>,
    devices: RwLock<HashMap<DeviceId, DeviceAssignment>>,
    gate_events: RwLock<BTreeMap<GateEventId, GateEvent>>,
    plate_events: RwLock<BTreeMap<PlateEventId, PlateEvent>>,
    weight_events: RwLock<BTreeMap<WeightEventId, WeightEvent>>,
    permits: RwLock<BTreeMap<PermitId, Permit>>,
    audit: RwLock<Vec<PermitAudit>>,
    sequence: AtomicI64,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed reference data. Gates and devices are otherwise owned by
    /// configuration management.
    pub fn with_topology(
        gates: impl IntoIterator<Item = Gate>,
        devices: impl IntoIterator<Item = DeviceAssignment>,
    ) -> StorageResult<Self> {
        let storage = Self::new();
        for gate in gates {
            storage.register_gate(gate)?;
        }
        for device in devices {
            storage.register_device(device)?;
        }
        Ok(storage)
    }

    pub fn register_gate(&self, gate: Gate) -> StorageResult<()> {
        write(&self.gates, "gates")?.insert(gate.id, gate);
        Ok(())
    }

    pub fn register_device(&self, device: DeviceAssignment) -> StorageResult<()> {
        write(&self.devices, "devices")?.insert(device.device_id.clone(), device);
        Ok(())
    }

    /// Remove a device binding, leaving the device unassigned.
    pub fn unassign_device(&self, device_id: &DeviceId) -> StorageResult<bool> {
        Ok(write(&self.devices, "devices")?.remove(device_id).is_some())
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryCheckpointStorage {
    async fn device_gate(&self, device_id: &DeviceId) -> StorageResult<DeviceAssignment> {
        read(&self.devices, "devices")?
            .get(device_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{device_id} has no gate assignment")))
    }

    async fn gate_device_count(&self, gate_id: GateId) -> StorageResult<u32> {
        let count = read(&self.devices, "devices")?
            .values()
            .filter(|d| d.gate_id == gate_id)
            .count();
        u32::try_from(count)
            .map_err(|_| StorageError::InvalidInput("device count too large".to_string()))
    }
}

#[async_trait]
impl TopologyStore for InMemoryCheckpointStorage {
    async fn gate(&self, gate_id: GateId) -> StorageResult<Option<Gate>> {
        Ok(read(&self.gates, "gates")?.get(&gate_id).cloned())
    }
}

#[async_trait]
impl GateEventStore for InMemoryCheckpointStorage {
    async fn create_gate_event(
        &self,
        gate_id: GateId,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<GateEvent> {
        let event = GateEvent {
            id: GateEventId::new(self.next_id()),
            gate_id,
            timestamp,
            permit_id: None,
        };
        write(&self.gate_events, "gate events")?.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_gate_event(&self, gate_event_id: GateEventId) -> StorageResult<Option<GateEvent>> {
        Ok(read(&self.gate_events, "gate events")?
            .get(&gate_event_id)
            .cloned())
    }

    async fn attach_permit(
        &self,
        gate_event_id: GateEventId,
        permit_id: PermitId,
    ) -> StorageResult<PermitId> {
        let mut guard = write(&self.gate_events, "gate events")?;
        let event = guard
            .get_mut(&gate_event_id)
            .ok_or_else(|| StorageError::NotFound(format!("{gate_event_id} not found")))?;
        Ok(*event.permit_id.get_or_insert(permit_id))
    }

    async fn gate_events_for_permit(&self, permit_id: PermitId) -> StorageResult<Vec<GateEvent>> {
        Ok(read(&self.gate_events, "gate events")?
            .values()
            .filter(|e| e.permit_id == Some(permit_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SensorEventStore for InMemoryCheckpointStorage {
    async fn record_plate_event(&self, event: NewPlateEvent) -> StorageResult<PlateEvent> {
        let record = PlateEvent {
            id: PlateEventId::new(self.next_id()),
            system_event_id: event.system_event_id,
            camera_id: event.camera_id,
            camera_name: event.camera_name,
            plate: event.plate,
            plate_corrected: None,
            corrected_by: None,
            image_key: event.image_key,
            timestamp: event.timestamp,
            gate_event_id: None,
        };
        write(&self.plate_events, "plate events")?.insert(record.id, record.clone());
        Ok(record)
    }

    async fn record_weight_event(&self, event: NewWeightEvent) -> StorageResult<WeightEvent> {
        let record = WeightEvent {
            id: WeightEventId::new(self.next_id()),
            system_event_id: event.system_event_id,
            scale_id: event.scale_id,
            weight: event.weight,
            timestamp: event.timestamp,
            gate_event_id: None,
        };
        write(&self.weight_events, "weight events")?.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_plate_event(&self, id: PlateEventId) -> StorageResult<Option<PlateEvent>> {
        Ok(read(&self.plate_events, "plate events")?.get(&id).cloned())
    }

    async fn get_weight_event(&self, id: WeightEventId) -> StorageResult<Option<WeightEvent>> {
        Ok(read(&self.weight_events, "weight events")?.get(&id).cloned())
    }

    async fn link_plate_event(
        &self,
        id: PlateEventId,
        gate_event_id: GateEventId,
    ) -> StorageResult<()> {
        let mut guard = write(&self.plate_events, "plate events")?;
        let event = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("{id} not found")))?;
        event.gate_event_id = Some(gate_event_id);
        Ok(())
    }

    async fn link_weight_event(
        &self,
        id: WeightEventId,
        gate_event_id: GateEventId,
    ) -> StorageResult<()> {
        let mut guard = write(&self.weight_events, "weight events")?;
        let event = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("{id} not found")))?;
        event.gate_event_id = Some(gate_event_id);
        Ok(())
    }

    async fn plate_events_for(&self, gate_event_id: GateEventId) -> StorageResult<Vec<PlateEvent>> {
        Ok(read(&self.plate_events, "plate events")?
            .values()
            .filter(|e| e.gate_event_id == Some(gate_event_id))
            .cloned()
            .collect())
    }

    async fn weight_events_for(
        &self,
        gate_event_id: GateEventId,
    ) -> StorageResult<Vec<WeightEvent>> {
        Ok(read(&self.weight_events, "weight events")?
            .values()
            .filter(|e| e.gate_event_id == Some(gate_event_id))
            .cloned()
            .collect())
    }

    async fn correct_plate(
        &self,
        id: PlateEventId,
        corrected: Option<String>,
        corrected_by: Option<String>,
    ) -> StorageResult<PlateEvent> {
        let mut guard = write(&self.plate_events, "plate events")?;
        let event = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("{id} not found")))?;
        event.plate_corrected = corrected;
        event.corrected_by = corrected_by;
        Ok(event.clone())
    }
}

#[async_trait]
impl PermitStore for InMemoryCheckpointStorage {
    async fn create_permit(&self, permit: NewPermit) -> StorageResult<Permit> {
        let record = Permit {
            id: PermitId::new(self.next_id()),
            plate_front: permit.plate_front,
            plate_back: String::new(),
            total_weight: 0.0,
            entry_time: permit.entry_time,
            exit_time: None,
            is_closed: false,
            is_void: false,
            flow_id: permit.flow_id,
            current_step_sequence: permit.current_step_sequence,
            last_activity_at: Utc::now(),
        };
        write(&self.permits, "permits")?.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_permit(&self, permit_id: PermitId) -> StorageResult<Option<Permit>> {
        Ok(read(&self.permits, "permits")?.get(&permit_id).cloned())
    }

    async fn find_open_permit_by_plates(
        &self,
        plates: &[String],
    ) -> StorageResult<Option<Permit>> {
        if plates.is_empty() {
            return Ok(None);
        }
        Ok(read(&self.permits, "permits")?
            .values()
            .find(|p| p.is_open() && plates.iter().any(|plate| p.holds_plate(plate)))
            .cloned())
    }

    async fn save_permit(&self, permit: &Permit) -> StorageResult<()> {
        let mut guard = write(&self.permits, "permits")?;
        let stored = guard
            .get_mut(&permit.id)
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", permit.id)))?;
        *stored = permit.clone();
        Ok(())
    }

    async fn list_permits(&self, window: QueryWindow) -> StorageResult<Vec<Permit>> {
        let values = read(&self.permits, "permits")?
            .values()
            .rev()
            .cloned()
            .collect::<Vec<_>>();
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl AuditStore for InMemoryCheckpointStorage {
    async fn append_permit_audit(&self, entry: PermitAuditAppend) -> StorageResult<PermitAudit> {
        let record = PermitAudit {
            id: PermitAuditId::new(self.next_id()),
            permit_id: entry.permit_id,
            action: entry.action,
            actor: entry.actor,
            changes: entry.changes,
            comment: entry.comment,
            recorded_at: entry.recorded_at,
        };
        write(&self.audit, "audit")?.push(record.clone());
        Ok(record)
    }

    async fn list_permit_audit(&self, permit_id: PermitId) -> StorageResult<Vec<PermitAudit>> {
        Ok(read(&self.audit, "audit")?
            .iter()
            .filter(|a| a.permit_id == permit_id)
            .cloned()
            .collect())
    }
}

fn read<'a, T>(lock: &'a RwLock<T>, name: &str) -> StorageResult<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| StorageError::Backend(format!("{name} lock poisoned")))
}

fn write<'a, T>(lock: &'a RwLock<T>, name: &str) -> StorageResult<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| StorageError::Backend(format!("{name} lock poisoned")))
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_types::AuditAction;

    fn storage() -> InMemoryCheckpointStorage {
        InMemoryCheckpointStorage::with_topology(
            [Gate::new(GateId::new(1), "entry").entry()],
            [
                DeviceAssignment::camera("CAM-1", GateId::new(1)),
                DeviceAssignment::scale("SCALE-1", GateId::new(1)),
            ],
        )
        .unwrap()
    }

    fn new_permit(plate: &str) -> NewPermit {
        NewPermit {
            plate_front: plate.to_string(),
            entry_time: Utc::now(),
            flow_id: None,
            current_step_sequence: 1,
        }
    }

    #[tokio::test]
    async fn unassigned_device_is_not_found() {
        let storage = storage();
        assert!(storage.device_gate(&DeviceId::new("CAM-1")).await.is_ok());

        let result = storage.device_gate(&DeviceId::new("CAM-9")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn gate_device_count_spans_cameras_and_scales() {
        let storage = storage();
        assert_eq!(storage.gate_device_count(GateId::new(1)).await.unwrap(), 2);
        assert_eq!(storage.gate_device_count(GateId::new(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn attach_permit_is_assign_once() {
        let storage = storage();
        let event = storage
            .create_gate_event(GateId::new(1), Utc::now())
            .await
            .unwrap();

        let first = storage
            .attach_permit(event.id, PermitId::new(100))
            .await
            .unwrap();
        let second = storage
            .attach_permit(event.id, PermitId::new(200))
            .await
            .unwrap();

        assert_eq!(first, PermitId::new(100));
        assert_eq!(second, PermitId::new(100));
        let stored = storage.get_gate_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.permit_id, Some(PermitId::new(100)));
    }

    #[tokio::test]
    async fn open_permit_lookup_matches_either_plate_and_skips_closed() {
        let storage = storage();
        let mut closed = storage.create_permit(new_permit("AB1234")).await.unwrap();
        closed.is_closed = true;
        closed.exit_time = Some(Utc::now());
        storage.save_permit(&closed).await.unwrap();

        let mut open = storage.create_permit(new_permit("AB1234")).await.unwrap();
        open.plate_back = "CD5678".to_string();
        storage.save_permit(&open).await.unwrap();

        let by_front = storage
            .find_open_permit_by_plates(&["AB1234".to_string()])
            .await
            .unwrap();
        assert_eq!(by_front.map(|p| p.id), Some(open.id));

        let by_back = storage
            .find_open_permit_by_plates(&["ZZ0000".to_string(), "CD5678".to_string()])
            .await
            .unwrap();
        assert_eq!(by_back.map(|p| p.id), Some(open.id));

        assert!(storage
            .find_open_permit_by_plates(&[])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sensor_events_are_returned_in_arrival_order() {
        let storage = storage();
        let gate_event = storage
            .create_gate_event(GateId::new(1), Utc::now())
            .await
            .unwrap();
        for plate in ["AB1234", "CD5678"] {
            let event = storage
                .record_plate_event(NewPlateEvent::new("CAM-1", plate))
                .await
                .unwrap();
            storage
                .link_plate_event(event.id, gate_event.id)
                .await
                .unwrap();
        }
        let unlinked = storage
            .record_plate_event(NewPlateEvent::new("CAM-1", "EF9012"))
            .await
            .unwrap();

        let plates = storage.plate_events_for(gate_event.id).await.unwrap();
        let values: Vec<&str> = plates.iter().map(|p| p.plate.as_str()).collect();
        assert_eq!(values, vec!["AB1234", "CD5678"]);
        assert!(!plates.iter().any(|p| p.id == unlinked.id));
    }

    #[tokio::test]
    async fn audit_entries_are_filtered_by_permit() {
        let storage = storage();
        let entries = [
            (1, AuditAction::Create),
            (2, AuditAction::Create),
            (1, AuditAction::Close),
        ];
        for (permit, action) in entries {
            storage
                .append_permit_audit(PermitAuditAppend {
                    permit_id: PermitId::new(permit),
                    action,
                    actor: "engine".to_string(),
                    changes: serde_json::json!({}),
                    comment: String::new(),
                    recorded_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let trail = storage.list_permit_audit(PermitId::new(1)).await.unwrap();
        let actions: Vec<AuditAction> = trail.iter().map(|a| a.action).collect();
        assert_eq!(actions, vec![AuditAction::Create, AuditAction::Close]);
    }
}
