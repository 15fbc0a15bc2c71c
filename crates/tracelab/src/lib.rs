//! # TraceLab - Execution Tracer for Untrusted Snippets
//!
//! TraceLab runs short Python and JavaScript snippets in a time-bounded
//! sandbox, records what they do, and reduces the trace into metrics.
//!
//! ## Features
//!
//! - **Instrumentation**: Source-to-source rewriting that inserts trace hooks
//!   without changing program behavior
//! - **Isolation**: One child process and scratch directory per execution,
//!   torn down on every exit path
//! - **Live Feed**: `progress`, `update`, `complete` and `error` events keyed
//!   by execution id
//! - **Analysis**: Call graph, line heatmap, run comparison and complexity
//!   estimation across input sizes
//!
//! ## Quick Start
//!
//! ```ignore
//! use tracelab::prelude::*;
//!
//! let lab = TraceLab::builder()
//!     .with_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let request = ExecutionRequest::new("python", "def f(n):\n    return n * 2\nprint(f(21))\n");
//! let report = lab
//!     .execute(request, |id, event| println!("{id}: {}", event.event_type()))
//!     .await?;
//! println!("{}", report.to_text());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Your Application                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                    tracelab (facade)                    │
//! │          builder · orchestrator · compare · profile     │
//! ├───────────────┬───────────────┬─────────────────────────┤
//! │ tracelab-lang │ tracelab-host │    tracelab-observe     │
//! │ (rewriters,   │ (sandbox,     │ (live feed, metrics,    │
//! │  preludes)    │  demux)       │  reports)               │
//! ├───────────────┴───────────────┴─────────────────────────┤
//! │          tracelab-core  ·  tracelab-resource            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod execution;
pub mod profile;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::info;

use tracelab_core::{
    ExecutionError, ExecutionId, ExecutionRequest, LanguageHandler, LanguageInfo,
    LanguageRegistry, ResourceLimits, RuntimeConfig, SandboxPolicy, SharedHandler,
};
use tracelab_observe::{
    ComparisonReport, DataPoint, EventDispatcher, EventSubscriber, ExecutionReport,
    LiveEvent, LoggingSubscriber, ProfileReport, ProfileSample, estimate_complexity,
};
use tracelab_resource::{DeadlineStats, SharedTimeoutMonitor, TimeoutMonitor};

use crate::execution::{Admitted, InFlight, drive};

// Re-export from sub-crates
pub use tracelab_core;
pub use tracelab_host;
pub use tracelab_lang;
pub use tracelab_observe;
pub use tracelab_resource;

pub use error::{TraceLabError, TraceLabResult};
pub use execution::ExecutionHandle;
pub use profile::ProfileInput;

/// Builder for configuring a [`TraceLab`] runtime.
pub struct TraceLabBuilder {
    config: RuntimeConfig,
    builtin_languages: bool,
    handlers: Vec<SharedHandler>,
    event_subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl TraceLabBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            builtin_languages: true,
            handlers: Vec::new(),
            event_subscribers: Vec::new(),
        }
    }

    /// Replace the whole runtime configuration.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    // Interpreters

    /// Set the Python interpreter.
    pub fn with_python(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.interpreters.python = path.into();
        self
    }

    /// Set the Node.js interpreter.
    pub fn with_node(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.interpreters.node = path.into();
        self
    }

    // Limits and policy

    /// Set the default wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.limits.timeout = Some(timeout);
        self
    }

    /// Set the memory ceiling of each interpreter.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.config.limits.max_memory_bytes = Some(bytes);
        self
    }

    /// Set custom resource limits.
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Set the environment policy.
    pub fn with_policy(mut self, policy: SandboxPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Set the capacity of each execution's event channel.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    // Languages

    /// Skip registering the Python and JavaScript handlers.
    pub fn without_builtin_languages(mut self) -> Self {
        self.builtin_languages = false;
        self
    }

    /// Register an additional language handler.
    pub fn with_handler<H: LanguageHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    // Observability

    /// Add a subscriber for the live events of every execution.
    pub fn with_event_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.event_subscribers.push(subscriber);
        self
    }

    /// Log every live event through `tracing`.
    pub fn with_logging(self) -> Self {
        self.with_event_subscriber(Arc::new(LoggingSubscriber::new()))
    }

    /// Build the runtime.
    pub fn build(self) -> TraceLabResult<TraceLab> {
        if self.config.event_channel_capacity == 0 {
            return Err(TraceLabError::Config(
                "event channel capacity must be positive".to_string(),
            ));
        }
        if self.config.limits.timeout.is_some_and(|t| t.is_zero()) {
            return Err(TraceLabError::Config("timeout must be positive".to_string()));
        }

        let monitor: SharedTimeoutMonitor = Arc::new(TimeoutMonitor::new());
        let registry = LanguageRegistry::new();
        if self.builtin_languages {
            tracelab_lang::register_builtin(&registry, &self.config, Some(Arc::clone(&monitor)))?;
        }
        for handler in self.handlers {
            registry.register_shared(handler)?;
        }

        let dispatcher = EventDispatcher::new();
        for subscriber in self.event_subscribers {
            dispatcher.subscribe(subscriber);
        }

        info!(
            languages = registry.len(),
            subscribers = dispatcher.subscriber_count(),
            "TraceLab runtime ready"
        );
        Ok(TraceLab {
            inner: Arc::new(Inner {
                config: self.config,
                registry,
                dispatcher,
                in_flight: InFlight::default(),
                monitor,
            }),
        })
    }
}

impl Default for TraceLabBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    config: RuntimeConfig,
    registry: LanguageRegistry,
    dispatcher: EventDispatcher,
    in_flight: InFlight,
    monitor: SharedTimeoutMonitor,
}

/// A configured TraceLab runtime.
///
/// Cheap to clone; clones share the registry, subscribers and the table of
/// in-flight executions.
#[derive(Clone)]
pub struct TraceLab {
    inner: Arc<Inner>,
}

impl TraceLab {
    /// Create a new runtime builder.
    pub fn builder() -> TraceLabBuilder {
        TraceLabBuilder::new()
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> TraceLabResult<Self> {
        TraceLabBuilder::new().build()
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Get the language registry.
    pub fn registry(&self) -> &LanguageRegistry {
        &self.inner.registry
    }

    /// Get the event dispatcher.
    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// The supported-languages listing.
    pub fn languages(&self) -> Vec<LanguageInfo> {
        self.inner.registry.languages()
    }

    /// Number of executions currently holding a sandbox.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Timeout counters across all executions.
    pub fn timeout_stats(&self) -> DeadlineStats {
        self.inner.monitor.stats()
    }

    fn admit(&self, request: ExecutionRequest) -> TraceLabResult<Admitted> {
        request.validate()?;
        if request.source.trim().is_empty() {
            return Err(ExecutionError::InvalidRequest("source is empty".to_string()).into());
        }
        let handler = self.inner.registry.resolve(&request.language)?;
        let guard = self.inner.in_flight.claim(&request.id)?;
        Ok(Admitted {
            handler,
            request,
            guard,
        })
    }

    /// Start an execution and return its live feed and result.
    ///
    /// Unknown languages, invalid requests and ids already in flight are
    /// rejected here, before any sandbox exists.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: ExecutionRequest) -> TraceLabResult<ExecutionHandle> {
        let admitted = self.admit(request)?;
        let id = admitted.request.id.clone();
        info!(execution_id = %id, language = admitted.handler.id(), "Execution submitted");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let feed_id = id.clone();
        tokio::spawn(async move {
            let capacity = inner.config.event_channel_capacity;
            let result = drive(admitted, capacity, |event: LiveEvent| {
                inner.dispatcher.emit(&feed_id, &event);
                // The caller may have dropped the feed.
                let _ = events_tx.send(event);
            })
            .await;
            let _ = result_tx.send(result);
        });

        Ok(ExecutionHandle {
            id,
            events: events_rx,
            result: result_rx,
        })
    }

    /// Run an execution, passing each live event to `sink`, and return its
    /// report.
    ///
    /// `sink` is called in emission order and never after the terminal
    /// event.
    pub async fn execute<F>(
        &self,
        request: ExecutionRequest,
        mut sink: F,
    ) -> TraceLabResult<ExecutionReport>
    where
        F: FnMut(&ExecutionId, &LiveEvent) + Send,
    {
        let mut handle = self.submit(request)?;
        while let Some(event) = handle.next_event().await {
            sink(&handle.id, &event);
        }
        handle.wait().await
    }

    /// Run an execution without a live sink.
    pub async fn run(&self, request: ExecutionRequest) -> TraceLabResult<ExecutionReport> {
        self.submit(request)?.wait().await
    }

    /// Run two executions concurrently, each in its own sandbox, and
    /// compare their metrics.
    pub async fn compare(
        &self,
        first: ExecutionRequest,
        second: ExecutionRequest,
    ) -> TraceLabResult<ComparisonReport> {
        let first = self.submit(first)?;
        let second = self.submit(second)?;
        let (first, second) = tokio::join!(first.wait(), second.wait());

        let report = ComparisonReport::new(first?, second?);
        info!(
            first = %report.first.execution_id,
            second = %report.second.execution_id,
            score = report.comparison.score,
            verdict = %report.comparison.verdict,
            "Comparison finished"
        );
        Ok(report)
    }

    /// Run `template` once per input, one at a time, and estimate how its
    /// duration grows with input size.
    ///
    /// Failed runs are listed but not fitted.
    pub async fn profile<I>(
        &self,
        template: ExecutionRequest,
        inputs: I,
    ) -> TraceLabResult<ProfileReport>
    where
        I: IntoIterator<Item = ProfileInput>,
    {
        let inputs: Vec<ProfileInput> = inputs.into_iter().collect();
        if inputs.is_empty() {
            return Err(ExecutionError::InvalidRequest(
                "profile needs at least one input".to_string(),
            )
            .into());
        }

        let mut samples = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let report = self.run(input.request(&template)).await?;
            samples.push(ProfileSample {
                input_size: input.input_size,
                execution_id: report.execution_id.clone(),
                duration_ms: report.outcome.duration_ms(),
                success: report.is_success(),
            });
        }

        let points: Vec<DataPoint> = samples
            .iter()
            .filter(|s| s.success)
            .map(|s| DataPoint::new(s.input_size, s.duration_ms))
            .collect();
        let complexity = estimate_complexity(&points);
        info!(
            language = template.language.as_str(),
            runs = samples.len(),
            notation = complexity.notation.as_str(),
            confidence = complexity.confidence,
            "Profile finished"
        );

        Ok(ProfileReport {
            language: template.language,
            samples,
            complexity,
        })
    }
}

impl std::fmt::Debug for TraceLab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLab")
            .field("languages", &self.inner.registry.ids())
            .field("in_flight", &self.in_flight())
            .field("limits", &self.inner.config.limits)
            .finish()
    }
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{
        ExecutionHandle, ProfileInput, TraceLab, TraceLabBuilder, TraceLabError, TraceLabResult,
    };

    // Core types
    pub use tracelab_core::{
        ExecutionError, ExecutionId, ExecutionOutcome, ExecutionRequest, LanguageHandler,
        LanguageInfo, ResourceLimits, RuntimeConfig, SandboxPolicy, TraceEvent, TrackingOptions,
    };

    // Observability types
    pub use tracelab_observe::{
        CollectingSubscriber, ComparisonReport, EventSubscriber, ExecutionReport, LiveEvent,
        LoggingSubscriber, ProfileReport, TraceMetrics, Verdict,
    };

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_observe::CollectingSubscriber;

    #[test]
    fn test_builder() {
        let lab = TraceLab::builder()
            .with_timeout(Duration::from_secs(3))
            .with_memory_limit(64 * 1024 * 1024)
            .with_python("/usr/bin/python3")
            .build()
            .unwrap();

        assert_eq!(lab.config().limits.timeout, Some(Duration::from_secs(3)));
        assert_eq!(lab.config().limits.max_memory_bytes, Some(64 * 1024 * 1024));
        assert_eq!(lab.config().interpreters.python, PathBuf::from("/usr/bin/python3"));
        assert!(lab.registry().contains("python"));
        assert!(lab.registry().contains("javascript"));
        assert_eq!(lab.in_flight(), 0);
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let err = TraceLab::builder()
            .with_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, TraceLabError::Config(_)));

        let err = TraceLab::builder()
            .with_event_channel_capacity(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, TraceLabError::Config(_)));
    }

    #[test]
    fn test_builder_subscribers() {
        let lab = TraceLab::builder()
            .with_logging()
            .with_event_subscriber(Arc::new(CollectingSubscriber::new(10)))
            .without_builtin_languages()
            .build()
            .unwrap();

        assert_eq!(lab.event_dispatcher().subscriber_count(), 2);
        assert!(lab.languages().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_language_rejected() {
        let lab = TraceLab::with_defaults().unwrap();
        let err = lab
            .submit(ExecutionRequest::new("cobol", "DISPLAY 'HI'"))
            .unwrap_err();

        assert!(matches!(
            err.as_execution(),
            Some(ExecutionError::UnsupportedLanguage(lang)) if lang == "cobol"
        ));
        assert_eq!(lab.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let lab = TraceLab::with_defaults().unwrap();

        let zero = ExecutionRequest::new("python", "x = 1").with_timeout(Duration::ZERO);
        assert!(matches!(
            lab.submit(zero).unwrap_err().as_execution(),
            Some(ExecutionError::InvalidRequest(_))
        ));

        let blank = ExecutionRequest::new("python", "  \n\t");
        assert!(matches!(
            lab.submit(blank).unwrap_err().as_execution(),
            Some(ExecutionError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_needs_inputs() {
        let lab = TraceLab::with_defaults().unwrap();
        let err = lab
            .profile(ExecutionRequest::new("python", "pass"), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_execution(),
            Some(ExecutionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let lab: TraceLab = TraceLab::builder().build().unwrap();
        let _request = ExecutionRequest::new("python", "print(1)")
            .with_options(TrackingOptions::all())
            .with_timeout(Duration::from_secs(1));
        assert_eq!(lab.languages().len(), 2);
    }
}
