//! Errors from the TraceLab facade.

use thiserror::Error;

use tracelab_core::{ExecutionError, ExecutionId};

/// Errors from the TraceLab runtime.
#[derive(Debug, Error)]
pub enum TraceLabError {
    /// Execution error.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The runtime was configured inconsistently.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The execution task went away without resolving its result.
    #[error("Execution {0} ended without a result")]
    Lost(ExecutionId),
}

impl TraceLabError {
    /// The underlying execution error, if any.
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            TraceLabError::Execution(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for facade operations.
pub type TraceLabResult<T> = Result<T, TraceLabError>;
