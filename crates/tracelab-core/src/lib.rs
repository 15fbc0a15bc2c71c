//! TraceLab Core - shared vocabulary of the execution tracer
//!
//! This crate provides the types every other TraceLab crate speaks:
//!
//! - [`TraceEvent`]: The timestamped observations produced during a run
//! - [`ExecutionRequest`] and [`ExecutionOutcome`]: One execution in and out
//! - [`protocol`]: The out-of-band framing multiplexed over program output
//! - [`LanguageHandler`]: The per-language instrument/execute contract
//! - [`LanguageRegistry`]: Exact-match resolution of language identifiers
//! - Configuration types for tracking, limits and sandbox policy
//!
//! # Quick Start
//!
//! ```ignore
//! use tracelab_core::prelude::*;
//!
//! let registry = LanguageRegistry::new();
//! registry.register(PythonHandler::new(&RuntimeConfig::default()))?;
//!
//! let request = ExecutionRequest::new("python", "print(sum(range(10)))");
//! let handler = registry.resolve(&request.language)?;
//! let program = handler.instrument(&request.source, &request.options)?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! ├─────────────────────────────────────────┤
//! │           tracelab (facade)             │
//! ├─────────────────────────────────────────┤
//! │  tracelab-lang  │  tracelab-host  │ ... │
//! ├─────────────────────────────────────────┤
//! │             tracelab-core               │
//! └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod request;

// Re-export main types at crate root
pub use config::{InterpreterConfig, ResourceLimits, RuntimeConfig, SandboxPolicy, TrackingOptions};
pub use error::{ExecutionError, ExecutionResult, ProtocolError, ProtocolResult};
pub use event::{
    EventKind, FunctionCall, GLOBAL_CALLER, LineExecution, MemorySample, SUMMARY_MAX_CHARS,
    TraceEvent, VariableState, summarize,
};
pub use handler::{
    EventSender, ExecutionContext, InstrumentationStats, InstrumentedProgram,
    LanguageHandler, LanguageInfo,
};
pub use protocol::{CallTotal, ErrorPayload, FinalPayload, Frame, TraceTotals, decode_line};
pub use registry::{LanguageRegistry, SharedHandler};
pub use request::{
    ExecutionFailure, ExecutionId, ExecutionOutcome, ExecutionRequest, ExecutionSuccess,
    FailureKind,
};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```ignore
/// use tracelab_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ResourceLimits, RuntimeConfig, SandboxPolicy, TrackingOptions};
    pub use crate::error::{ExecutionError, ExecutionResult};
    pub use crate::event::{EventKind, TraceEvent};
    pub use crate::handler::{ExecutionContext, InstrumentedProgram, LanguageHandler};
    pub use crate::registry::LanguageRegistry;
    pub use crate::request::{ExecutionId, ExecutionOutcome, ExecutionRequest};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let registry = LanguageRegistry::new();
        assert!(registry.is_empty());

        let request = ExecutionRequest::new("cobol", "DISPLAY 'HI'");
        assert!(matches!(
            registry.resolve(&request.language),
            Err(ExecutionError::UnsupportedLanguage(_))
        ));
        assert!(request.options.any_enabled());
    }
}
