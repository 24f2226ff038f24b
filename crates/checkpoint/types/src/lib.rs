//! Checkpoint Types - domain records for multi-gate vehicle crossings
//!
//! Cameras and weighbridges at each gate report plate and weight readings.
//! The engine groups those readings into per-gate aggregation windows
//! ([`GateEvent`]) and folds them into one crossing [`Permit`] per vehicle as
//! it moves through the configured route of gates.
//!
//! ## Key Concepts
//!
//! - **Gate**: a physical checkpoint position, optionally a step in a flow
//! - **GateEvent**: one aggregation window of readings at one gate
//! - **Permit**: the open/closed lifecycle record of one crossing
//! - **Effective plate**: the operator-corrected plate if set, else the raw one

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod permit;
pub mod topology;

pub use events::{
    plate_candidates, GateEvent, NewPlateEvent, NewWeightEvent, PlateEvent, WeightEvent,
};
pub use ids::{
    DeviceId, FlowId, FlowStepId, GateEventId, GateId, PermitAuditId, PermitId, PlateEventId,
    SystemEventId, WeightEventId,
};
pub use permit::{AuditAction, NewPermit, Permit, PermitAudit, PermitAuditAppend};
pub use topology::{DeviceAssignment, DeviceKind, DeviceRole, FlowStep, Gate};
