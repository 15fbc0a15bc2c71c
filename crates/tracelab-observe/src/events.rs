//! The live event feed.
//!
//! Every execution publishes `progress`, `update`, `complete` and `error`
//! events. Subscribers see the events of every execution and must key them
//! by execution id.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use tracelab_core::{ExecutionId, ExecutionOutcome, TraceEvent};

use crate::metrics::TraceMetrics;

/// Stage reported once instrumentation has finished.
pub const STAGE_INSTRUMENTATION: &str = "instrumentation";

/// Status of a finished stage.
pub const STATUS_COMPLETE: &str = "complete";

/// An event on the live feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LiveEvent {
    /// A pipeline stage changed status.
    Progress {
        /// Stage name.
        stage: String,
        /// Stage status.
        status: String,
    },
    /// A trace event decoded from the running program.
    Update {
        /// The trace event, serialized as `{event, data}`.
        #[serde(flatten)]
        event: TraceEvent,
    },
    /// The execution finished; sent exactly once unless `Error` is sent.
    Complete {
        /// Final outcome.
        #[serde(rename = "result")]
        outcome: Box<ExecutionOutcome>,
        /// Metrics of the final trace.
        metrics: Box<TraceMetrics>,
    },
    /// The execution could not be carried out.
    Error {
        /// Error message.
        message: String,
    },
}

impl LiveEvent {
    /// Instrumentation finished.
    pub fn instrumented() -> Self {
        LiveEvent::Progress {
            stage: STAGE_INSTRUMENTATION.to_string(),
            status: STATUS_COMPLETE.to_string(),
        }
    }

    /// Wrap a trace event.
    pub fn update(event: TraceEvent) -> Self {
        LiveEvent::Update { event }
    }

    /// The final outcome.
    pub fn complete(outcome: ExecutionOutcome, metrics: TraceMetrics) -> Self {
        LiveEvent::Complete {
            outcome: Box::new(outcome),
            metrics: Box::new(metrics),
        }
    }

    /// An error.
    pub fn error(message: impl Into<String>) -> Self {
        LiveEvent::Error {
            message: message.into(),
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            LiveEvent::Progress { .. } => "progress",
            LiveEvent::Update { .. } => "update",
            LiveEvent::Complete { .. } => "complete",
            LiveEvent::Error { .. } => "error",
        }
    }

    /// Whether no further events follow for the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LiveEvent::Complete { .. } | LiveEvent::Error { .. })
    }

    /// The trace event of an `update`.
    pub fn trace_event(&self) -> Option<&TraceEvent> {
        match self {
            LiveEvent::Update { event } => Some(event),
            _ => None,
        }
    }
}

/// A live event tagged with its execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    /// Execution the event belongs to.
    pub execution_id: ExecutionId,
    /// The event.
    #[serde(flatten)]
    pub event: LiveEvent,
}

impl FeedEvent {
    /// Tag an event.
    pub fn new(execution_id: ExecutionId, event: LiveEvent) -> Self {
        Self {
            execution_id,
            event,
        }
    }

    /// Single-line JSON form.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Subscriber for live events of every execution.
pub trait EventSubscriber: Send + Sync {
    /// Called for each event.
    fn on_event(&self, execution_id: &ExecutionId, event: &LiveEvent);

    /// Event types this subscriber wants; `None` means all.
    fn event_filter(&self) -> Option<Vec<&'static str>> {
        None
    }
}

/// Turns live events into `tracing` records.
pub struct LoggingSubscriber {
    /// Level used for `update` events.
    pub update_level: tracing::Level,
}

impl LoggingSubscriber {
    /// Create a new logging subscriber.
    pub fn new() -> Self {
        Self {
            update_level: tracing::Level::TRACE,
        }
    }

    /// Set the level used for `update` events.
    pub fn with_update_level(mut self, level: tracing::Level) -> Self {
        self.update_level = level;
        self
    }
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, execution_id: &ExecutionId, event: &LiveEvent) {
        match event {
            LiveEvent::Progress { stage, status } => {
                tracing::debug!(
                    execution_id = %execution_id,
                    stage = stage.as_str(),
                    status = status.as_str(),
                    "Execution progress"
                );
            }
            LiveEvent::Update { event } => {
                let kind = event.kind();
                let timestamp_ms = event.timestamp_ms();
                if self.update_level == tracing::Level::DEBUG {
                    tracing::debug!(execution_id = %execution_id, event = %kind, timestamp_ms, "Trace event");
                } else if self.update_level <= tracing::Level::INFO {
                    tracing::info!(execution_id = %execution_id, event = %kind, timestamp_ms, "Trace event");
                } else {
                    tracing::trace!(execution_id = %execution_id, event = %kind, timestamp_ms, "Trace event");
                }
            }
            LiveEvent::Complete { outcome, metrics } => {
                tracing::info!(
                    execution_id = %execution_id,
                    success = outcome.is_success(),
                    duration_ms = metrics.summary.execution_time_ms,
                    function_calls = metrics.summary.total_function_calls,
                    "Execution complete"
                );
            }
            LiveEvent::Error { message } => {
                tracing::warn!(execution_id = %execution_id, message = message.as_str(), "Execution error");
            }
        }
    }
}

/// Collects events for later inspection.
pub struct CollectingSubscriber {
    events: RwLock<Vec<(Instant, FeedEvent)>>,
    max_events: usize,
}

impl CollectingSubscriber {
    /// Create a subscriber keeping at most `max_events` events.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<FeedEvent> {
        self.events.read().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Events of one execution, in arrival order.
    pub fn events_for(&self, execution_id: &ExecutionId) -> Vec<LiveEvent> {
        self.events
            .read()
            .iter()
            .filter(|(_, e)| &e.execution_id == execution_id)
            .map(|(_, e)| e.event.clone())
            .collect()
    }

    /// Arrival instants, for latency checks.
    pub fn arrival_times(&self) -> Vec<Instant> {
        self.events.read().iter().map(|(at, _)| *at).collect()
    }

    /// Clear collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get event count.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn on_event(&self, execution_id: &ExecutionId, event: &LiveEvent) {
        let mut events = self.events.write();
        if events.len() < self.max_events {
            events.push((
                Instant::now(),
                FeedEvent::new(execution_id.clone(), event.clone()),
            ));
        }
    }
}

/// Fans live events out to subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver an event to every interested subscriber.
    pub fn emit(&self, execution_id: &ExecutionId, event: &LiveEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            if let Some(filter) = subscriber.event_filter() {
                if !filter.contains(&event.event_type()) {
                    continue;
                }
            }
            subscriber.on_event(execution_id, event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_core::{ExecutionSuccess, VariableState};

    fn variable() -> TraceEvent {
        TraceEvent::VariableState(VariableState {
            timestamp_ms: 1.5,
            name: "x".to_string(),
            type_name: "int".to_string(),
            value: "1".to_string(),
            line: 1,
        })
    }

    struct ErrorsOnly(CollectingSubscriber);

    impl EventSubscriber for ErrorsOnly {
        fn on_event(&self, execution_id: &ExecutionId, event: &LiveEvent) {
            self.0.on_event(execution_id, event);
        }

        fn event_filter(&self) -> Option<Vec<&'static str>> {
            Some(vec!["error"])
        }
    }

    #[test]
    fn test_live_event_type() {
        assert_eq!(LiveEvent::instrumented().event_type(), "progress");
        assert_eq!(LiveEvent::update(variable()).event_type(), "update");
        assert_eq!(LiveEvent::error("x").event_type(), "error");
        assert!(LiveEvent::error("x").is_terminal());
        assert!(!LiveEvent::instrumented().is_terminal());
    }

    #[test]
    fn test_update_wire_shape() {
        let feed = FeedEvent::new(ExecutionId::from("abc"), LiveEvent::update(variable()));
        let json: serde_json::Value = serde_json::from_str(&feed.to_json_line()).unwrap();

        assert_eq!(json["executionId"], "abc");
        assert_eq!(json["type"], "update");
        assert_eq!(json["event"], "variableState");
        assert_eq!(json["data"]["name"], "x");
        assert_eq!(json["data"]["type"], "int");
    }

    #[test]
    fn test_progress_and_complete_wire_shape() {
        let progress = serde_json::to_value(LiveEvent::instrumented()).unwrap();
        assert_eq!(progress["stage"], "instrumentation");
        assert_eq!(progress["status"], "complete");

        let complete = LiveEvent::complete(
            ExecutionOutcome::Success(ExecutionSuccess::default()),
            TraceMetrics::empty(3.0),
        );
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["result"]["status"], "success");
        assert_eq!(json["metrics"]["summary"]["executionTimeMs"], 3.0);
    }

    #[test]
    fn test_collecting_subscriber_keys_by_execution() {
        let subscriber = CollectingSubscriber::new(100);
        let a = ExecutionId::from("a");
        let b = ExecutionId::from("b");

        subscriber.on_event(&a, &LiveEvent::instrumented());
        subscriber.on_event(&b, &LiveEvent::instrumented());
        subscriber.on_event(&a, &LiveEvent::update(variable()));

        assert_eq!(subscriber.len(), 3);
        let for_a = subscriber.events_for(&a);
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[1].trace_event(), Some(&variable()));
    }

    #[test]
    fn test_collecting_subscriber_max_events() {
        let subscriber = CollectingSubscriber::new(2);
        let id = ExecutionId::from("x");
        for _ in 0..5 {
            subscriber.on_event(&id, &LiveEvent::instrumented());
        }
        assert_eq!(subscriber.len(), 2);
    }

    #[test]
    fn test_event_dispatcher_filters() {
        let dispatcher = EventDispatcher::new();
        let all = Arc::new(CollectingSubscriber::new(100));
        let errors = Arc::new(ErrorsOnly(CollectingSubscriber::new(100)));

        dispatcher.subscribe(Arc::clone(&all) as Arc<dyn EventSubscriber>);
        dispatcher.subscribe(Arc::clone(&errors) as Arc<dyn EventSubscriber>);
        assert_eq!(dispatcher.subscriber_count(), 2);

        let id = ExecutionId::from("x");
        dispatcher.emit(&id, &LiveEvent::instrumented());
        dispatcher.emit(&id, &LiveEvent::error("boom"));

        assert_eq!(all.len(), 2);
        assert_eq!(errors.0.len(), 1);
    }
}
