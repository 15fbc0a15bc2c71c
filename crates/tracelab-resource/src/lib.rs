//! TraceLab Resource Management
//!
//! This crate provides resource management for TraceLab executions,
//! including:
//!
//! - Wall-clock deadlines with a reaping grace period via [`Deadline`]
//! - Output and event caps via [`OutputLimiter`]
//! - Per-execution scratch directories via [`ScratchWorkspace`]
//!
//! # Resource Management Strategy
//!
//! 1. **Deadlines**: the sandbox is killed when its timeout elapses and must
//!    be reaped within the grace period
//! 2. **Output Limits**: ordinary output beyond the cap is dropped
//! 3. **Scratch Cleanup**: every transient file lives in a directory that is
//!    removed on drop
//!
//! ```ignore
//! use tracelab_resource::prelude::*;
//!
//! let deadline = Deadline::start(&DeadlineConfig::new(Duration::from_secs(5)));
//! let workspace = ScratchWorkspace::create()?;
//! let limiter = OutputLimiter::new(LimiterConfig::from_limits(&limits));
//! ```

pub mod deadline;
pub mod error;
pub mod limiter;
pub mod workspace;

// Re-export main types
pub use deadline::{Deadline, DeadlineConfig, DeadlineStats, SharedTimeoutMonitor, TimeoutMonitor};
pub use error::{ResourceError, ResourceResult};
pub use limiter::{LimiterConfig, OutputLimiter, truncate_to_boundary};
pub use workspace::ScratchWorkspace;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::deadline::{Deadline, DeadlineConfig, TimeoutMonitor};
    pub use crate::error::{ResourceError, ResourceResult};
    pub use crate::limiter::{LimiterConfig, OutputLimiter};
    pub use crate::workspace::ScratchWorkspace;
}
