//! Error types for resource management.

use std::path::PathBuf;

use thiserror::Error;

/// Errors related to resource management.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The scratch workspace could not be created.
    #[error("Failed to create scratch workspace: {0}")]
    WorkspaceCreate(#[source] std::io::Error),

    /// A file could not be written into the scratch workspace.
    #[error("Failed to write '{path}': {source}")]
    WorkspaceWrite {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The scratch workspace could not be removed.
    #[error("Failed to remove scratch workspace: {0}")]
    WorkspaceCleanup(#[source] std::io::Error),

    /// Configuration error.
    #[error("Invalid resource configuration: {0}")]
    InvalidConfig(String),
}

impl From<ResourceError> for tracelab_core::ExecutionError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::WorkspaceCreate(source)
            | ResourceError::WorkspaceWrite { source, .. }
            | ResourceError::WorkspaceCleanup(source) => tracelab_core::ExecutionError::Io(source),
            ResourceError::InvalidConfig(msg) => tracelab_core::ExecutionError::InvalidRequest(msg),
        }
    }
}

/// Result type for resource operations.
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_errors_convert_to_io() {
        let err = ResourceError::WorkspaceCreate(std::io::Error::other("disk full"));
        let converted: tracelab_core::ExecutionError = err.into();
        assert!(matches!(converted, tracelab_core::ExecutionError::Io(_)));
    }

    #[test]
    fn test_invalid_config_converts_to_invalid_request() {
        let err = ResourceError::InvalidConfig("timeout must be positive".to_string());
        let converted: tracelab_core::ExecutionError = err.into();
        assert!(matches!(
            converted,
            tracelab_core::ExecutionError::InvalidRequest(msg) if msg.contains("timeout")
        ));
    }
}
