//! Sensor readings and the gate-level aggregation windows that group them.

use crate::ids::{
    DeviceId, GateEventId, GateId, PermitId, PlateEventId, SystemEventId, WeightEventId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One aggregation window of sensor readings at one gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvent {
    pub id: GateEventId,
    pub gate_id: GateId,
    /// Session start
    pub timestamp: DateTime<Utc>,
    /// Assigned at most once, never changed afterwards
    pub permit_id: Option<PermitId>,
}

/// Plate recognition reading from a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateEvent {
    pub id: PlateEventId,
    pub system_event_id: Option<SystemEventId>,
    pub camera_id: DeviceId,
    #[serde(default)]
    pub camera_name: String,
    pub plate: String,
    /// Manual operator override of the recognised plate
    #[serde(default)]
    pub plate_corrected: Option<String>,
    #[serde(default)]
    pub corrected_by: Option<String>,
    #[serde(default)]
    pub image_key: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub gate_event_id: Option<GateEventId>,
}

impl PlateEvent {
    /// The corrected plate if one is set and non-empty, else the raw plate.
    pub fn effective_plate(&self) -> &str {
        match self.plate_corrected.as_deref() {
            Some(corrected) if !corrected.is_empty() => corrected,
            _ => &self.plate,
        }
    }
}

/// Ingress payload for a plate reading, before the store assigns an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlateEvent {
    pub system_event_id: Option<SystemEventId>,
    pub camera_id: DeviceId,
    #[serde(default)]
    pub camera_name: String,
    pub plate: String,
    #[serde(default)]
    pub image_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewPlateEvent {
    pub fn new(camera_id: impl Into<String>, plate: impl Into<String>) -> Self {
        Self {
            system_event_id: None,
            camera_id: DeviceId::new(camera_id),
            camera_name: String::new(),
            plate: plate.into(),
            image_key: None,
            timestamp: Utc::now(),
        }
    }
}

/// Weighbridge reading from a scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEvent {
    pub id: WeightEventId,
    pub system_event_id: Option<SystemEventId>,
    pub scale_id: DeviceId,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
    pub gate_event_id: Option<GateEventId>,
}

/// Ingress payload for a weight reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWeightEvent {
    pub system_event_id: Option<SystemEventId>,
    pub scale_id: DeviceId,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

impl NewWeightEvent {
    pub fn new(scale_id: impl Into<String>, weight: f64) -> Self {
        Self {
            system_event_id: None,
            scale_id: DeviceId::new(scale_id),
            weight,
            timestamp: Utc::now(),
        }
    }
}

/// Effective plates of `events`, empty ones skipped, de-duplicated in order of
/// first appearance. The first entry is the best plate.
pub fn plate_candidates(events: &[PlateEvent]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        let plate = event.effective_plate();
        if plate.is_empty() || candidates.iter().any(|c| c == plate) {
            continue;
        }
        candidates.push(plate.to_string());
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate_event(id: i64, plate: &str, corrected: Option<&str>) -> PlateEvent {
        PlateEvent {
            id: PlateEventId::new(id),
            system_event_id: None,
            camera_id: DeviceId::new("CAM-1"),
            camera_name: String::new(),
            plate: plate.to_string(),
            plate_corrected: corrected.map(str::to_string),
            corrected_by: None,
            image_key: None,
            timestamp: Utc::now(),
            gate_event_id: None,
        }
    }

    #[test]
    fn test_effective_plate_prefers_non_empty_correction() {
        assert_eq!(plate_event(1, "AB1234", None).effective_plate(), "AB1234");
        assert_eq!(
            plate_event(1, "A81234", Some("AB1234")).effective_plate(),
            "AB1234"
        );
        assert_eq!(plate_event(1, "AB1234", Some("")).effective_plate(), "AB1234");
    }

    #[test]
    fn test_candidates_skip_empty_and_keep_first_appearance() {
        let events = vec![
            plate_event(1, "", None),
            plate_event(2, "XY0001", None),
            plate_event(3, "A81234", Some("AB1234")),
            plate_event(4, "XY0001", None),
            plate_event(5, "AB1234", None),
        ];
        assert_eq!(plate_candidates(&events), vec!["XY0001", "AB1234"]);
    }

    #[test]
    fn test_candidates_of_no_events_is_empty() {
        assert!(plate_candidates(&[]).is_empty());
    }
}
