//! Checkpoint storage abstractions.
//!
//! This crate defines the storage contract for the gate correlation engine:
//! - device directory and gate/flow topology (read-only reference data)
//! - gate events and the raw plate/weight readings linked to them
//! - permits and their append-only audit trail
//! - the ephemeral, expiring session store shared between engine instances
//!
//! Design stance:
//! - Postgres remains the transactional source of truth.
//! - The in-memory backends are deterministic references for tests and
//!   single-instance runs.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod session;
mod traits;

pub use error::{SessionResult, SessionStoreError, StorageError, StorageResult};
pub use memory::InMemoryCheckpointStorage;
pub use session::{InMemorySessionStore, SessionStore};
pub use traits::{
    AuditStore, CheckpointStorage, DeviceDirectory, GateEventStore, PermitStore, QueryWindow,
    SensorEventStore, TopologyStore,
};
