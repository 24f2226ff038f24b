//! Checkpoint daemon library
//!
//! Components behind the `checkpointd` binary:
//! - Layered configuration (defaults, file, `CHECKPOINT_` environment)
//! - Storage and session store selection with topology seeding
//! - NDJSON replay of recorded sensor streams through the engine

pub mod config;
pub mod error;
pub mod node;
pub mod replay;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use node::{CheckpointNode, ReplaySummary};
pub use replay::{parse_line, ReplayRecord, ReplayStep};
