//! Errors surfaced to callers of the capture service.

use thiserror::Error;

/// Failure of a task operation.
///
/// The first three variants are ordinary caller mistakes. `Invariant` means
/// the registry's partitions disagree with each other, which only a bug can
/// cause; it is logged at error level where it is raised.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture task '{0}' already exists")]
    DuplicateTask(String),

    #[error("capture task '{0}' not found")]
    TaskNotFound(String),

    #[error("capture task '{0}' is already stopped")]
    TaskAlreadyStopped(String),

    #[error("capture service is shutting down")]
    ShuttingDown,

    #[error("capture registry invariant violated: {0}")]
    Invariant(String),

    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl CaptureError {
    /// True for errors a client can fix or retry; false for internal faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CaptureError::DuplicateTask(_)
                | CaptureError::TaskNotFound(_)
                | CaptureError::TaskAlreadyStopped(_)
                | CaptureError::ShuttingDown
        )
    }
}
