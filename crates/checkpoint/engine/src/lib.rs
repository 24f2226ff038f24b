//! Checkpoint Engine - gate event correlation and permit lifecycle
//!
//! Sensors at a gate report independently. The engine groups their readings
//! into gate events through short-lived per-gate sessions, then attaches each
//! gate event to the crossing permit of the vehicle it saw and advances that
//! permit along its flow until an exit gate closes it.
//!
//! ## Pipeline
//!
//! 1. [`EventCorrelator`] maps the reading's device to a gate and joins the
//!    gate's session ([`GateSessionTracker`])
//! 2. [`ResolutionDispatcher`] schedules a resolution pass for the gate event
//! 3. [`PermitMatcher`] identifies or opens the permit
//! 4. [`apply_gate_event`] enriches or closes it
//!
//! Every pass reads durable state only, so passes can be repeated freely.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod audit;
pub mod config;
pub mod correction;
pub mod correlator;
pub mod dispatch;
pub mod engine;
mod error;
pub mod lifecycle;
pub mod matcher;
pub mod session;

pub use audit::{AuditRecorder, ENGINE_ACTOR};
pub use config::{DispatchConfig, DispatchMode, EngineConfig, ExpectedDevices, SessionConfig};
pub use correction::{PlateCorrection, PlateCorrector};
pub use correlator::EventCorrelator;
pub use dispatch::ResolutionDispatcher;
pub use engine::GateEngine;
pub use error::{EngineError, EngineResult};
pub use lifecycle::{
    apply_gate_event, opening_permit, rewrite_plate, ChangeSet, GateObservation, PermitChange,
    INITIAL_STEP_SEQUENCE,
};
pub use matcher::{MatchOrigin, PermitMatcher, Resolution};
pub use session::GateSessionTracker;
