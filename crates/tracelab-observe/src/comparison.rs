//! Relative performance of two executions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSummary;

/// Score weight of the execution-time change.
pub const TIME_WEIGHT: f64 = 3.0;
/// Score weight of the peak-memory change.
pub const MEMORY_WEIGHT: f64 = 2.0;
/// Score weight of the function-call change.
pub const CALLS_WEIGHT: f64 = 1.0;

/// Change of one metric from the first run to the second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    /// Value in the first run.
    pub first: f64,
    /// Value in the second run.
    pub second: f64,
    /// `second - first`.
    pub delta: f64,
    /// Delta relative to the mean of both values, in percent.
    pub percent_change: f64,
}

impl MetricDelta {
    /// Compute the change between two values.
    pub fn between(first: f64, second: f64) -> Self {
        let delta = second - first;
        let mean = (first + second) / 2.0;
        let percent_change = if mean == 0.0 { 0.0 } else { delta / mean * 100.0 };
        Self {
            first,
            second,
            delta,
            percent_change,
        }
    }

    /// The same change seen from the other side.
    pub fn reversed(&self) -> Self {
        Self::between(self.second, self.first)
    }
}

/// Which run performed better overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    /// The first run was better.
    First,
    /// The second run was better.
    Second,
    /// Every metric was identical.
    Tie,
}

impl Verdict {
    /// The verdict with the runs swapped.
    pub fn swapped(self) -> Self {
        match self {
            Verdict::First => Verdict::Second,
            Verdict::Second => Verdict::First,
            Verdict::Tie => Verdict::Tie,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::First => write!(f, "first"),
            Verdict::Second => write!(f, "second"),
            Verdict::Tie => write!(f, "tie"),
        }
    }
}

/// Per-metric changes and the overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// Execution time change.
    pub execution_time: MetricDelta,
    /// Peak memory change.
    pub peak_memory: MetricDelta,
    /// Function call count change.
    pub function_calls: MetricDelta,
    /// Weighted sum of the percent changes; negative favours the second run.
    pub score: f64,
    /// Overall verdict.
    pub verdict: Verdict,
}

impl ComparisonResult {
    /// Compare two metric summaries.
    pub fn between(first: &MetricsSummary, second: &MetricsSummary) -> Self {
        let execution_time = MetricDelta::between(first.execution_time_ms, second.execution_time_ms);
        let peak_memory = MetricDelta::between(
            first.peak_memory_bytes as f64,
            second.peak_memory_bytes as f64,
        );
        let function_calls = MetricDelta::between(
            first.total_function_calls as f64,
            second.total_function_calls as f64,
        );
        Self::from_deltas(execution_time, peak_memory, function_calls)
    }

    fn from_deltas(
        execution_time: MetricDelta,
        peak_memory: MetricDelta,
        function_calls: MetricDelta,
    ) -> Self {
        let score = TIME_WEIGHT * execution_time.percent_change
            + MEMORY_WEIGHT * peak_memory.percent_change
            + CALLS_WEIGHT * function_calls.percent_change;

        let verdict = if score < 0.0 {
            Verdict::Second
        } else if score > 0.0 {
            Verdict::First
        } else {
            // Balanced score: the first metric that moved decides.
            [execution_time, peak_memory, function_calls]
                .iter()
                .find(|m| m.delta != 0.0)
                .map_or(Verdict::Tie, |m| {
                    if m.delta < 0.0 {
                        Verdict::Second
                    } else {
                        Verdict::First
                    }
                })
        };

        Self {
            execution_time,
            peak_memory,
            function_calls,
            score,
            verdict,
        }
    }

    /// The comparison with the runs swapped.
    pub fn reversed(&self) -> Self {
        Self::from_deltas(
            self.execution_time.reversed(),
            self.peak_memory.reversed(),
            self.function_calls.reversed(),
        )
    }
}

/// Compare two metric summaries.
pub fn compare_metrics(first: &MetricsSummary, second: &MetricsSummary) -> ComparisonResult {
    ComparisonResult::between(first, second)
}
