//! Error types for the sandbox runtime.

use thiserror::Error;
use tracelab_core::ExecutionError;
use tracelab_resource::ResourceError;

use crate::state::SandboxState;

/// Errors related to the sandbox runtime.
#[derive(Debug, Error)]
pub enum HostError {
    /// The interpreter could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// The interpreter that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A state transition was attempted out of order.
    #[error("Invalid sandbox transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: SandboxState,
        /// Requested state.
        to: SandboxState,
    },

    /// A child stream was not captured.
    #[error("Child {0} was not captured")]
    MissingStream(&'static str),

    /// Resource management failed.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// IO error while supervising the child.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HostError> for ExecutionError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Spawn { program, source } => ExecutionError::Spawn { program, source },
            HostError::Resource(err) => err.into(),
            HostError::Io(err) => ExecutionError::Io(err),
            other => ExecutionError::Internal(other.to_string()),
        }
    }
}

/// Result type for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_violations_are_internal() {
        let err: ExecutionError = HostError::MissingStream("stdout").into();
        assert!(matches!(err, ExecutionError::Internal(msg) if msg.contains("stdout")));

        let err: ExecutionError = HostError::InvalidTransition {
            from: SandboxState::Created,
            to: SandboxState::Completed,
        }
        .into();
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn test_spawn_failure_keeps_program() {
        let err: ExecutionError = HostError::Spawn {
            program: "python3".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        assert!(matches!(err, ExecutionError::Spawn { program, .. } if program == "python3"));
    }
}
