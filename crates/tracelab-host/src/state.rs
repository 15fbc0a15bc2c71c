//! Per-execution sandbox state machine.
//!
//! ```text
//! Created → Instrumented → Running → { Completed | Failed | TimedOut }
//! ```
//!
//! The terminal transition happens exactly once. A second terminal signal
//! is ignored and logged.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use tracelab_core::ExecutionId;

use crate::error::{HostError, HostResult};

/// Lifecycle state of one sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxState {
    /// Allocated, nothing written yet.
    Created,
    /// The instrumented program is in place.
    Instrumented,
    /// The interpreter is running; the only state that emits events.
    Running,
    /// Finished with a result frame or a clean exit.
    Completed,
    /// Finished with an error.
    Failed,
    /// Terminated by the deadline.
    TimedOut,
}

impl SandboxState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SandboxState::Completed | SandboxState::Failed | SandboxState::TimedOut
        )
    }

    /// Name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxState::Created => "created",
            SandboxState::Instrumented => "instrumented",
            SandboxState::Running => "running",
            SandboxState::Completed => "completed",
            SandboxState::Failed => "failed",
            SandboxState::TimedOut => "timed_out",
        }
    }

    fn next(&self) -> Option<SandboxState> {
        match self {
            SandboxState::Created => Some(SandboxState::Instrumented),
            SandboxState::Instrumented => Some(SandboxState::Running),
            _ => None,
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable state of one sandbox.
#[derive(Clone)]
pub struct StateCell {
    id: ExecutionId,
    state: Arc<Mutex<SandboxState>>,
}

impl StateCell {
    /// Create a cell in the `Created` state.
    pub fn new(id: ExecutionId) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SandboxState::Created)),
        }
    }

    /// Current state.
    pub fn get(&self) -> SandboxState {
        *self.state.lock()
    }

    /// Advance along the non-terminal path.
    ///
    /// # Errors
    ///
    /// Returns an error if `to` is not the direct successor of the current
    /// state.
    pub fn advance(&self, to: SandboxState) -> HostResult<()> {
        let mut state = self.state.lock();
        if state.next() != Some(to) {
            return Err(HostError::InvalidTransition { from: *state, to });
        }
        debug!(execution_id = %self.id, from = %*state, to = %to, "Sandbox state transition");
        *state = to;
        Ok(())
    }

    /// Enter a terminal state.
    ///
    /// Returns `true` on the first terminal signal. Later signals leave the
    /// state unchanged and return `false`.
    pub fn finish(&self, to: SandboxState) -> bool {
        debug_assert!(to.is_terminal());

        let mut state = self.state.lock();
        if state.is_terminal() {
            warn!(
                execution_id = %self.id,
                current = %*state,
                ignored = %to,
                "Ignoring second terminal signal"
            );
            return false;
        }
        debug!(execution_id = %self.id, from = %*state, to = %to, "Sandbox state transition");
        *state = to;
        true
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("id", &self.id)
            .field("state", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let cell = StateCell::new(ExecutionId::from("t"));
        assert_eq!(cell.get(), SandboxState::Created);

        cell.advance(SandboxState::Instrumented).unwrap();
        cell.advance(SandboxState::Running).unwrap();
        assert!(cell.finish(SandboxState::Completed));
        assert_eq!(cell.get(), SandboxState::Completed);
    }

    #[test]
    fn test_skipping_states_rejected() {
        let cell = StateCell::new(ExecutionId::from("t"));
        let result = cell.advance(SandboxState::Running);
        assert!(matches!(
            result,
            Err(HostError::InvalidTransition {
                from: SandboxState::Created,
                to: SandboxState::Running
            })
        ));
    }

    #[test]
    fn test_terminal_exactly_once() {
        let cell = StateCell::new(ExecutionId::from("t"));
        cell.advance(SandboxState::Instrumented).unwrap();
        cell.advance(SandboxState::Running).unwrap();

        assert!(cell.finish(SandboxState::TimedOut));
        assert!(!cell.finish(SandboxState::Completed));
        assert!(!cell.finish(SandboxState::Failed));
        assert_eq!(cell.get(), SandboxState::TimedOut);
    }

    #[test]
    fn test_clones_share_state() {
        let cell = StateCell::new(ExecutionId::from("t"));
        let observer = cell.clone();
        cell.advance(SandboxState::Instrumented).unwrap();
        assert_eq!(observer.get(), SandboxState::Instrumented);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!SandboxState::Running.is_terminal());
        assert!(SandboxState::Failed.is_terminal());
        assert_eq!(SandboxState::TimedOut.to_string(), "timed_out");
    }
}
