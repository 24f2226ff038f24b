//! Strongly-typed identifiers for checkpoint entities
//!
//! Row identifiers are assigned by the relational store and wrapped in newtype
//! structs so a gate id can never be passed where a permit id is expected.
//! Device identifiers are the free-form source ids reported by cameras and
//! scales.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a physical gate
    GateId,
    "gate"
);
row_id!(
    /// Identifier of a routing flow
    FlowId,
    "flow"
);
row_id!(
    /// Identifier of one step within a routing flow
    FlowStepId,
    "step"
);
row_id!(
    /// Identifier of one aggregation window at a gate
    GateEventId,
    "gate-event"
);
row_id!(
    /// Identifier of a vehicle crossing permit
    PermitId,
    "permit"
);
row_id!(PlateEventId, "plate-event");
row_id!(WeightEventId, "weight-event");
row_id!(
    /// Ingress envelope id assigned when the raw payload was first stored
    SystemEventId,
    "system-event"
);
row_id!(PermitAuditId, "permit-audit");

/// Source identifier of a camera or scale
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_display_is_prefixed() {
        assert_eq!(GateId::new(7).to_string(), "gate:7");
        assert_eq!(PermitId::new(42).to_string(), "permit:42");
        assert_eq!(DeviceId::new("CAM-1").to_string(), "device:CAM-1");
    }

    #[test]
    fn test_row_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&GateEventId::new(3)).unwrap();
        assert_eq!(json, "3");

        let parsed: GateEventId = serde_json::from_str("11").unwrap();
        assert_eq!(parsed.get(), 11);
    }
}
