//! TraceLab Observe
//!
//! This crate turns the raw trace of an execution into something a person
//! or a UI can consume:
//!
//! - [`EventDispatcher`]: The live `progress`/`update`/`complete`/`error` feed
//! - [`aggregate`]: Per-function totals, call graph and line heatmap
//! - [`estimate_complexity`]: Growth-rate estimate from sized runs
//! - [`compare_metrics`]: Weighted comparison of two runs
//! - [`ExecutionReport`]: Text and JSON reports
//!
//! Everything except the dispatcher is a pure function of its input.
//!
//! # Metrics
//!
//! ```ignore
//! use tracelab_observe::aggregate;
//!
//! let metrics = aggregate(outcome.trace(), outcome.duration_ms());
//! println!("calls: {}", metrics.summary.total_function_calls);
//! ```
//!
//! # Event Subscription
//!
//! ```ignore
//! use tracelab_observe::{EventDispatcher, LiveEvent, LoggingSubscriber};
//! use std::sync::Arc;
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher.subscribe(Arc::new(LoggingSubscriber::new()));
//! dispatcher.emit(&execution_id, &LiveEvent::instrumented());
//! ```

pub mod comparison;
pub mod complexity;
pub mod events;
pub mod metrics;
pub mod report;

// Re-export main types
pub use comparison::{ComparisonResult, MetricDelta, Verdict, compare_metrics};
pub use complexity::{ComplexityEstimate, DataPoint, estimate_complexity};
pub use events::{
    CollectingSubscriber, EventDispatcher, EventSubscriber, FeedEvent, LiveEvent,
    LoggingSubscriber,
};
pub use metrics::{
    CallEdge, CallGraph, ExpensiveFunction, FunctionStats, HeatmapEntry, MetricsSummary,
    TraceAggregator, TraceMetrics, aggregate, aggregate_success,
};
pub use report::{
    ComparisonReport, Diagnostic, DiagnosticLevel, ExecutionReport, ProfileReport, ProfileSample,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::comparison::{ComparisonResult, Verdict};
    pub use crate::complexity::{ComplexityEstimate, DataPoint};
    pub use crate::events::{EventDispatcher, EventSubscriber, LiveEvent};
    pub use crate::metrics::{TraceMetrics, aggregate};
    pub use crate::report::{ComparisonReport, ExecutionReport, ProfileReport};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let metrics: TraceMetrics = aggregate(&[], 0.0);
        assert_eq!(metrics.summary.total_function_calls, 0);
        assert_eq!(metrics.call_graph.nodes, vec!["global".to_string()]);

        let comparison = ComparisonResult::between(&metrics.summary, &metrics.summary);
        assert_eq!(comparison.verdict, Verdict::Tie);
        assert_eq!(LiveEvent::instrumented().event_type(), "progress");
        let _ = DataPoint::new(1, 1.0);
        let _ = EventDispatcher::new();
    }
}
