//! TraceLab Lang - built-in language handlers
//!
//! This crate turns a snippet into an instrumented program for its
//! interpreter and runs it in a sandbox:
//!
//! - [`PythonHandler`]: CPython 3, traced through a decorator, inline
//!   assignment hooks and `sys.settrace`
//! - [`JavaScriptHandler`]: Node.js, traced through function wrappers,
//!   per-line markers and declaration hooks inside a `vm` context
//!
//! Each handler pairs a source rewriter written in Rust with a prelude in
//! the target language. The rewriter works on tokens, never on a full
//! syntax tree; when it cannot make sense of a snippet it passes the source
//! through unchanged and marks the program as degraded, so the run still
//! happens with coarser tracing.
//!
//! # Example
//!
//! ```ignore
//! use tracelab_core::{LanguageRegistry, RuntimeConfig};
//!
//! let registry = LanguageRegistry::new();
//! tracelab_lang::register_builtin(&registry, &RuntimeConfig::default(), None)?;
//! assert!(registry.contains("python"));
//! ```

pub mod edit;
pub mod error;
pub mod javascript;
pub mod launch;
pub mod python;
pub mod version;

use tracing::debug;

use tracelab_core::{ExecutionResult, LanguageRegistry, RuntimeConfig};
use tracelab_resource::SharedTimeoutMonitor;

// Re-export main types
pub use error::{LangError, LangResult};
pub use javascript::JavaScriptHandler;
pub use launch::Launcher;
pub use python::PythonHandler;
pub use version::VersionQuery;

/// Register the Python and JavaScript handlers.
///
/// # Errors
///
/// Fails if either language is already registered.
pub fn register_builtin(
    registry: &LanguageRegistry,
    config: &RuntimeConfig,
    monitor: Option<SharedTimeoutMonitor>,
) -> ExecutionResult<()> {
    let mut python = PythonHandler::new(config);
    let mut javascript = JavaScriptHandler::new(config);
    if let Some(monitor) = monitor {
        python = python.with_monitor(monitor.clone());
        javascript = javascript.with_monitor(monitor);
    }

    registry.register(python)?;
    registry.register(javascript)?;
    debug!(languages = registry.len(), "Built-in handlers registered");
    Ok(())
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{LangError, LangResult};
    pub use crate::javascript::JavaScriptHandler;
    pub use crate::python::PythonHandler;
    pub use crate::register_builtin;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracelab_core::ExecutionError;
    use tracelab_resource::TimeoutMonitor;

    #[test]
    fn test_register_builtin() {
        let registry = LanguageRegistry::new();
        register_builtin(&registry, &RuntimeConfig::default(), None).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("python"));
        assert!(registry.contains("javascript"));
        assert!(!registry.contains("Python"));
    }

    #[test]
    fn test_register_builtin_twice_fails() {
        let registry = LanguageRegistry::new();
        let monitor = Arc::new(TimeoutMonitor::new());
        register_builtin(&registry, &RuntimeConfig::default(), Some(monitor)).unwrap();

        let err = register_builtin(&registry, &RuntimeConfig::default(), None).unwrap_err();
        assert!(matches!(err, ExecutionError::DuplicateHandler(_)));
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _ = LangError::NulByte;
        let _: fn(&LanguageRegistry, &RuntimeConfig, Option<SharedTimeoutMonitor>) -> _ =
            register_builtin;
        assert_eq!(PythonHandler::ID, "python");
        assert_eq!(JavaScriptHandler::ID, "javascript");
    }
}
