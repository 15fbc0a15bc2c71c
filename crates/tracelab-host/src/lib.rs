//! TraceLab Sandbox Runtime
//!
//! This crate runs instrumented programs. It includes:
//!
//! - [`Sandbox`]: One interpreter process per execution, with a deadline,
//!   a scratch workspace and forced termination
//! - [`FrameDemux`]: Splits the program's output into ordinary output, live
//!   events and the terminal payload
//! - [`StateCell`]: The per-execution lifecycle state machine
//! - [`SandboxCommand`]: How a language handler launches its interpreter
//!
//! # Lifecycle
//!
//! ```text
//! Created → Instrumented → Running → { Completed | Failed | TimedOut }
//! ```
//!
//! Events are only emitted while `Running`, and the terminal transition
//! happens exactly once.
//!
//! # Example
//!
//! ```ignore
//! use tracelab_host::prelude::*;
//!
//! let sandbox = Sandbox::new(ctx.id.clone(), SandboxConfig::from_limits(&limits));
//! let command = SandboxCommand::new("node").arg("--no-warnings");
//! let outcome = sandbox.execute(&program, &command, &ctx, &events).await?;
//! ```

pub mod command;
pub mod demux;
pub mod error;
pub mod sandbox;
pub mod state;

// Re-export main types
pub use command::{SANDBOX_PATH, SandboxCommand, resolve_program};
pub use demux::{DemuxStats, ExitInfo, FrameDemux, Terminal};
pub use error::{HostError, HostResult};
pub use sandbox::{Sandbox, SandboxConfig, SandboxMetrics};
pub use state::{SandboxState, StateCell};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::command::SandboxCommand;
    pub use crate::error::{HostError, HostResult};
    pub use crate::sandbox::{Sandbox, SandboxConfig};
    pub use crate::state::SandboxState;
}
