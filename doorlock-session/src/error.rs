//! Session error types

use doorlock_transport::TransportError;
use thiserror::Error;

use crate::workflow::WorkflowStage;

/// Errors from session operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No device with the target name was seen before the scan timed out
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Operation needs an established link
    #[error("Not connected")]
    NotConnected,
}

/// Failure of one Auto-Open stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} failed: {source}")]
pub struct WorkflowError {
    pub stage: WorkflowStage,
    #[source]
    pub source: LockError,
}

impl WorkflowError {
    pub fn new(stage: WorkflowStage, source: impl Into<LockError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
