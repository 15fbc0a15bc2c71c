//! Wall-clock deadline management.
//!
//! Every execution runs against a [`Deadline`]: a timeout measured from the
//! moment the sandbox starts running, plus a grace period in which a
//! forcefully terminated sandbox must be reaped. A [`TimeoutMonitor`]
//! shared across executions keeps counters for diagnostics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{ResourceError, ResourceResult};

/// Configuration for execution deadlines.
#[derive(Debug, Clone)]
pub struct DeadlineConfig {
    /// Wall-clock timeout.
    pub timeout: Duration,
    /// How long a killed sandbox may take to be reaped.
    pub grace_period: Duration,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            grace_period: Duration::from_millis(250),
        }
    }
}

impl DeadlineConfig {
    /// Create a new deadline configuration.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Check that the timeout is positive.
    pub fn validate(&self) -> ResourceResult<()> {
        if self.timeout.is_zero() {
            return Err(ResourceError::InvalidConfig(
                "timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A running deadline.
///
/// Created when the sandbox enters its running state.
#[derive(Debug, Clone)]
pub struct Deadline {
    /// When the deadline started.
    pub started_at: Instant,
    /// The timeout duration.
    pub timeout: Duration,
    /// The grace period after forced termination.
    pub grace_period: Duration,
}

impl Deadline {
    /// Start a deadline now.
    pub fn start(config: &DeadlineConfig) -> Self {
        Self {
            started_at: Instant::now(),
            timeout: config.timeout,
            grace_period: config.grace_period,
        }
    }

    /// Time since the deadline started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the deadline started, in fractional milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// The instant at which the timeout fires, for `tokio::time::sleep_until`.
    pub fn expires_at(&self) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.started_at + self.timeout)
    }
}

/// Counters shared across executions.
#[derive(Debug, Default)]
pub struct TimeoutMonitor {
    started: AtomicU64,
    timeouts: AtomicU64,
    slow_reaps: AtomicU64,
}

/// A monitor shared across executions.
pub type SharedTimeoutMonitor = Arc<TimeoutMonitor>;

impl TimeoutMonitor {
    /// Create a new monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a deadline started.
    pub fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timeout event.
    pub fn record_timeout(&self, deadline: &Deadline) {
        let total = self.timeouts.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            limit_ms = deadline.timeout.as_millis() as u64,
            total_timeouts = total,
            "Execution timeout occurred"
        );
    }

    /// Record a sandbox that was not reaped within its grace period.
    pub fn record_slow_reap(&self, deadline: &Deadline) {
        self.slow_reaps.fetch_add(1, Ordering::Relaxed);
        warn!(
            grace_ms = deadline.grace_period.as_millis() as u64,
            "Sandbox not reaped within grace period"
        );
    }

    /// Get a snapshot of the counters.
    pub fn stats(&self) -> DeadlineStats {
        DeadlineStats {
            started: self.started.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            slow_reaps: self.slow_reaps.load(Ordering::Relaxed),
        }
    }
}

/// Statistics snapshot from a timeout monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineStats {
    /// Deadlines started.
    pub started: u64,
    /// Deadlines that expired.
    pub timeouts: u64,
    /// Killed sandboxes that outlived the grace period.
    pub slow_reaps: u64,
}

impl DeadlineStats {
    /// Fraction of executions that timed out.
    pub fn timeout_rate(&self) -> f64 {
        if self.started == 0 {
            0.0
        } else {
            self.timeouts as f64 / self.started as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_config() {
        let config = DeadlineConfig::new(Duration::from_millis(200))
            .with_grace_period(Duration::from_millis(50));

        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.grace_period, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = DeadlineConfig::new(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ResourceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deadline_expiry_instant() {
        let deadline = Deadline::start(&DeadlineConfig::new(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));

        assert!(deadline.elapsed_ms() >= 20.0);
        assert!(deadline.expires_at() <= tokio::time::Instant::now());
    }

    #[test]
    fn test_monitor_stats() {
        let monitor = TimeoutMonitor::new();
        let deadline = Deadline::start(&DeadlineConfig::default());

        monitor.record_start();
        monitor.record_start();
        monitor.record_timeout(&deadline);

        let stats = monitor.stats();
        assert_eq!(stats.started, 2);
        assert_eq!(stats.timeouts, 1);
        assert!((stats.timeout_rate() - 0.5).abs() < f64::EPSILON);
    }
}
