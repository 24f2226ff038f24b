//! Reference data read by the engine: gates, flow steps and device bindings.
//!
//! These records are owned by configuration management. The engine only
//! reads them while correlating events.

use crate::ids::{DeviceId, FlowId, FlowStepId, GateId};
use serde::{Deserialize, Serialize};

/// Position of a gate within a routing flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: FlowStepId,
    pub flow_id: FlowId,
    /// Strictly increasing within one flow
    pub sequence: i32,
}

/// A physical checkpoint position equipped with sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    pub id: GateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_entry: bool,
    #[serde(default)]
    pub is_exit: bool,
    /// A gate belongs to at most one flow step
    #[serde(default)]
    pub flow_step: Option<FlowStep>,
}

impl Gate {
    pub fn new(id: GateId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_entry: false,
            is_exit: false,
            flow_step: None,
        }
    }

    pub fn entry(mut self) -> Self {
        self.is_entry = true;
        self
    }

    pub fn exit(mut self) -> Self {
        self.is_exit = true;
        self
    }

    pub fn with_flow_step(mut self, step: FlowStep) -> Self {
        self.flow_step = Some(step);
        self
    }
}

/// Kind of sensor a device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Camera,
    Scale,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Scale => "scale",
        }
    }
}

/// Mounting role of a device at its gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Front,
    Back,
    Entry,
    Exit,
    #[default]
    Unspecified,
}

impl DeviceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceRole::Front => "front",
            DeviceRole::Back => "back",
            DeviceRole::Entry => "entry",
            DeviceRole::Exit => "exit",
            DeviceRole::Unspecified => "unspecified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "front" => Some(DeviceRole::Front),
            "back" => Some(DeviceRole::Back),
            "entry" => Some(DeviceRole::Entry),
            "exit" => Some(DeviceRole::Exit),
            "unspecified" | "" => Some(DeviceRole::Unspecified),
            _ => None,
        }
    }
}

/// Device directory entry binding a source id to a gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub device_id: DeviceId,
    pub kind: DeviceKind,
    pub gate_id: GateId,
    #[serde(default)]
    pub role: DeviceRole,
}

impl DeviceAssignment {
    pub fn camera(device_id: impl Into<String>, gate_id: GateId) -> Self {
        Self {
            device_id: DeviceId::new(device_id),
            kind: DeviceKind::Camera,
            gate_id,
            role: DeviceRole::Unspecified,
        }
    }

    pub fn scale(device_id: impl Into<String>, gate_id: GateId) -> Self {
        Self {
            device_id: DeviceId::new(device_id),
            kind: DeviceKind::Scale,
            gate_id,
            role: DeviceRole::Unspecified,
        }
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_deserializes_with_defaults() {
        let gate: Gate = serde_json::from_str(r#"{"id": 4}"#).unwrap();
        assert_eq!(gate.id, GateId::new(4));
        assert!(!gate.is_entry);
        assert!(!gate.is_exit);
        assert!(gate.flow_step.is_none());
    }

    #[test]
    fn test_device_role_round_trips_through_str() {
        for role in [
            DeviceRole::Front,
            DeviceRole::Back,
            DeviceRole::Entry,
            DeviceRole::Exit,
            DeviceRole::Unspecified,
        ] {
            assert_eq!(DeviceRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(DeviceRole::parse("roof"), None);
    }
}
