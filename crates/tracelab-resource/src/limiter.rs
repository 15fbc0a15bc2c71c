//! Output and event limiting.
//!
//! This module provides the `OutputLimiter`, which bounds how much ordinary
//! program output is retained and how many live events of each kind are
//! forwarded for a single execution.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, warn};

use tracelab_core::{EventKind, ResourceLimits};

/// Configuration for the output limiter.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum ordinary output retained, in bytes.
    pub max_output_bytes: usize,
    /// Maximum live events forwarded per event kind.
    pub max_events: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,
            max_events: 10_000,
        }
    }
}

impl LimiterConfig {
    /// Create a new limiter configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the configuration from resource limits.
    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            max_output_bytes: limits.max_output_bytes,
            max_events: limits.max_trace_events,
        }
    }

    /// Set the maximum retained output.
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the maximum forwarded events per kind.
    pub fn with_max_events(mut self, events: usize) -> Self {
        self.max_events = events;
        self
    }
}

const KINDS: usize = 4;

fn slot(kind: EventKind) -> usize {
    match kind {
        EventKind::Memory => 0,
        EventKind::FunctionCall => 1,
        EventKind::VariableState => 2,
        EventKind::ExecutionFlow => 3,
    }
}

/// Enforces output and event caps for one execution.
///
/// Each event kind has its own budget, so a flood of line events never
/// starves function calls or memory samples.
pub struct OutputLimiter {
    config: LimiterConfig,
    retained_bytes: AtomicUsize,
    dropped_bytes: AtomicUsize,
    events: [AtomicUsize; KINDS],
    dropped_events: AtomicUsize,
    output_warned: AtomicBool,
    events_warned: [AtomicBool; KINDS],
}

impl OutputLimiter {
    /// Create a new limiter with the given configuration.
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            retained_bytes: AtomicUsize::new(0),
            dropped_bytes: AtomicUsize::new(0),
            events: std::array::from_fn(|_| AtomicUsize::new(0)),
            dropped_events: AtomicUsize::new(0),
            output_warned: AtomicBool::new(false),
            events_warned: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    /// Create a limiter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(LimiterConfig::default())
    }

    /// Decide how many bytes of an output chunk may be retained.
    ///
    /// Returns the admitted prefix length, which is `0` once the cap is
    /// reached. The caller must cut on a character boundary at or below it.
    pub fn admit_output(&self, len: usize) -> usize {
        let retained = self.retained_bytes.load(Ordering::Relaxed);
        let room = self.config.max_output_bytes.saturating_sub(retained);
        let admitted = len.min(room);

        self.retained_bytes.fetch_add(admitted, Ordering::Relaxed);
        if admitted < len {
            self.dropped_bytes.fetch_add(len - admitted, Ordering::Relaxed);
            if !self.output_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    max_bytes = self.config.max_output_bytes,
                    "Output limit reached, dropping further output"
                );
            }
        }
        admitted
    }

    /// Check whether one more live event of `kind` may be forwarded.
    pub fn admit_event(&self, kind: EventKind) -> bool {
        let slot = slot(kind);
        let seen = self.events[slot].fetch_add(1, Ordering::Relaxed);
        if seen < self.config.max_events {
            return true;
        }

        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        if !self.events_warned[slot].swap(true, Ordering::Relaxed) {
            warn!(
                kind = %kind,
                max_events = self.config.max_events,
                "Event limit reached, dropping further events of this kind"
            );
        } else {
            debug!("Event dropped over limit");
        }
        false
    }

    /// Whether any output was dropped.
    pub fn output_truncated(&self) -> bool {
        self.dropped_bytes.load(Ordering::Relaxed) > 0
    }

    /// Whether any event was dropped.
    pub fn events_truncated(&self) -> bool {
        self.dropped_events.load(Ordering::Relaxed) > 0
    }
}

impl std::fmt::Debug for OutputLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLimiter")
            .field("config", &self.config)
            .field("retained_bytes", &self.retained_bytes.load(Ordering::Relaxed))
            .field("dropped_events", &self.dropped_events.load(Ordering::Relaxed))
            .finish()
    }
}

/// Cut `text` to at most `max` bytes on a character boundary.
pub fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_within_limit() {
        let limiter = OutputLimiter::new(LimiterConfig::new().with_max_output(16));

        assert_eq!(limiter.admit_output(10), 10);
        assert!(!limiter.output_truncated());
    }

    #[test]
    fn test_output_over_limit() {
        let limiter = OutputLimiter::new(LimiterConfig::new().with_max_output(16));

        assert_eq!(limiter.admit_output(10), 10);
        assert_eq!(limiter.admit_output(10), 6);
        assert_eq!(limiter.admit_output(10), 0);
        assert!(limiter.output_truncated());
    }

    #[test]
    fn test_event_cap() {
        let limiter = OutputLimiter::new(LimiterConfig::new().with_max_events(2));

        assert!(limiter.admit_event(EventKind::ExecutionFlow));
        assert!(limiter.admit_event(EventKind::ExecutionFlow));
        assert!(!limiter.admit_event(EventKind::ExecutionFlow));
        assert!(limiter.events_truncated());
    }

    #[test]
    fn test_event_caps_are_per_kind() {
        let limiter = OutputLimiter::new(LimiterConfig::new().with_max_events(1));

        assert!(limiter.admit_event(EventKind::ExecutionFlow));
        assert!(!limiter.admit_event(EventKind::ExecutionFlow));
        assert!(!limiter.admit_event(EventKind::ExecutionFlow));

        assert!(limiter.admit_event(EventKind::FunctionCall));
        assert!(limiter.admit_event(EventKind::Memory));
        assert!(limiter.admit_event(EventKind::VariableState));
        assert!(!limiter.admit_event(EventKind::FunctionCall));
    }

    #[test]
    fn test_from_limits() {
        let limits = ResourceLimits::minimal();
        let config = LimiterConfig::from_limits(&limits);
        assert_eq!(config.max_output_bytes, limits.max_output_bytes);
        assert_eq!(config.max_events, limits.max_trace_events);
    }

    #[test]
    fn test_truncate_to_boundary() {
        assert_eq!(truncate_to_boundary("hello", 10), "hello");
        assert_eq!(truncate_to_boundary("hello", 3), "hel");
        // 'é' is two bytes
        assert_eq!(truncate_to_boundary("aé", 2), "a");
    }
}
