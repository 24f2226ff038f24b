//! Permit records and their audit trail.

use crate::ids::{FlowId, PermitAuditId, PermitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle record of one vehicle's crossing
///
/// States are open and closed. The only transition is open to closed, driven
/// by an exit-gate event; `exit_time` is set exactly when `is_closed` is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permit {
    pub id: PermitId,
    pub plate_front: String,
    pub plate_back: String,
    pub total_weight: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub is_closed: bool,
    pub is_void: bool,
    pub flow_id: Option<FlowId>,
    pub current_step_sequence: i32,
    pub last_activity_at: DateTime<Utc>,
}

impl Permit {
    /// Whether either plate slot holds `plate`.
    pub fn holds_plate(&self, plate: &str) -> bool {
        !plate.is_empty() && (self.plate_front == plate || self.plate_back == plate)
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed
    }
}

/// Fields needed to open a new permit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPermit {
    pub plate_front: String,
    pub entry_time: DateTime<Utc>,
    pub flow_id: Option<FlowId>,
    pub current_step_sequence: i32,
}

/// What an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Close,
    CorrectPlate,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Close => "close",
            AuditAction::CorrectPlate => "correct_plate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "close" => Some(AuditAction::Close),
            "correct_plate" => Some(AuditAction::CorrectPlate),
            _ => None,
        }
    }
}

/// Audit append payload. Ids are assigned by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermitAuditAppend {
    pub permit_id: PermitId,
    pub action: AuditAction,
    pub actor: String,
    #[serde(default)]
    pub changes: Value,
    pub comment: String,
    pub recorded_at: DateTime<Utc>,
}

/// Stored audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermitAudit {
    pub id: PermitAuditId,
    pub permit_id: PermitId,
    pub action: AuditAction,
    pub actor: String,
    pub changes: Value,
    pub comment: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holds_plate_checks_both_slots_and_ignores_empty() {
        let now = Utc::now();
        let permit = Permit {
            id: PermitId::new(1),
            plate_front: "AB1234".to_string(),
            plate_back: String::new(),
            total_weight: 0.0,
            entry_time: now,
            exit_time: None,
            is_closed: false,
            is_void: false,
            flow_id: None,
            current_step_sequence: 1,
            last_activity_at: now,
        };
        assert!(permit.holds_plate("AB1234"));
        assert!(!permit.holds_plate("CD5678"));
        assert!(!permit.holds_plate(""));
    }
}
