use checkpoint_storage::StorageError;
use checkpoint_types::{DeviceId, GateEventId, GateId, PermitId, PlateEventId};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Correlation and permit lifecycle errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The reporting device is not bound to any gate. Permanent for that event.
    #[error("{0} has no gate assignment")]
    UnassignedDevice(DeviceId),

    #[error("{0} not found")]
    GateNotFound(GateId),

    #[error("{0} not found")]
    GateEventNotFound(GateEventId),

    #[error("{0} not found")]
    PermitNotFound(PermitId),

    #[error("{0} not found")]
    PlateEventNotFound(PlateEventId),

    /// Resolution was requested after the dispatcher shut down.
    #[error("resolution dispatcher is shut down, {0} not scheduled")]
    DispatcherClosed(GateEventId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
