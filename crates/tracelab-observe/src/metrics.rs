//! Reducing a trace into metrics.
//!
//! [`TraceAggregator`] folds events one at a time, so the same code serves a
//! finished trace and a live stream. Every grouping keeps first-seen order,
//! which makes the output a pure function of the event sequence.
//!
//! A run whose trace hit an event cap also reports running totals; those
//! replace the call counters derived from the capped trace.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tracelab_core::{
    ExecutionSuccess, FunctionCall, GLOBAL_CALLER, LineExecution, MemorySample, TraceEvent,
    TraceTotals,
};

use crate::complexity::{ComplexityEstimate, estimate_complexity};

/// The function with the largest cumulative duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensiveFunction {
    /// Function name.
    pub name: String,
    /// Cumulative duration over all calls.
    pub total_duration_ms: f64,
}

/// Headline numbers for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Wall-clock duration of the snippet.
    pub execution_time_ms: f64,
    /// Largest resident set size observed, 0 without memory samples.
    pub peak_memory_bytes: u64,
    /// Number of function call events.
    pub total_function_calls: usize,
    /// Number of distinct function names.
    pub unique_function_count: usize,
    /// Function with the largest cumulative duration.
    pub most_expensive_function: Option<ExpensiveFunction>,
}

/// Per-function totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStats {
    /// Function name.
    pub name: String,
    /// Number of calls.
    pub call_count: usize,
    /// Cumulative duration.
    pub total_duration_ms: f64,
    /// Mean duration per call.
    pub average_duration_ms: f64,
}

/// One caller to callee relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEdge {
    /// Caller name, `global` for the top level.
    pub source: String,
    /// Callee name.
    pub target: String,
    /// Number of calls along this edge.
    pub call_count: usize,
    /// Cumulative duration of those calls.
    pub total_duration_ms: f64,
    /// Mean duration per call.
    pub average_duration_ms: f64,
}

/// Caller to callee graph rooted at `global`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraph {
    /// Node names; `global` first, then in first-seen order.
    pub nodes: Vec<String>,
    /// Edges, one per (source, target) pair, in first-seen order.
    pub edges: Vec<CallEdge>,
}

impl Default for CallGraph {
    fn default() -> Self {
        Self {
            nodes: vec![GLOBAL_CALLER.to_string()],
            edges: Vec::new(),
        }
    }
}

impl CallGraph {
    /// Find the edge between two nodes.
    pub fn edge(&self, source: &str, target: &str) -> Option<&CallEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }

    /// Edges leaving `source`.
    pub fn callees<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a CallEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == source)
    }
}

/// A source line executed more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapEntry {
    /// Line number in the original source.
    pub line: u32,
    /// Source text of the line.
    pub source: String,
    /// Number of executions.
    pub execution_count: usize,
    /// Cumulative time spent on the line.
    pub total_duration_ms: f64,
    /// Mean time per execution.
    pub average_duration_ms: f64,
}

/// Everything derived from one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetrics {
    /// Headline numbers.
    pub summary: MetricsSummary,
    /// Per-function totals in first-seen order.
    pub functions: Vec<FunctionStats>,
    /// Caller to callee graph.
    pub call_graph: CallGraph,
    /// Hotspot lines, hottest first.
    pub heatmap: Vec<HeatmapEntry>,
    /// Complexity estimate.
    pub complexity: ComplexityEstimate,
    /// Number of variable mutations seen.
    pub variable_changes: usize,
    /// Number of events folded in.
    pub event_count: usize,
}

impl TraceMetrics {
    /// Metrics of an empty trace.
    pub fn empty(execution_time_ms: f64) -> Self {
        TraceAggregator::new().finish(execution_time_ms)
    }

    /// Totals for one function.
    pub fn function(&self, name: &str) -> Option<&FunctionStats> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Default)]
struct Totals {
    count: usize,
    total_ms: f64,
}

impl Totals {
    fn add(&mut self, duration_ms: f64) {
        self.count += 1;
        self.total_ms += duration_ms;
    }

    fn merge(&mut self, count: usize, total_ms: f64) {
        self.count += count;
        self.total_ms += total_ms;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// Incremental metrics builder.
#[derive(Debug, Default)]
pub struct TraceAggregator {
    peak_rss: u64,
    functions: Vec<(String, Totals)>,
    function_index: HashMap<String, usize>,
    nodes: Vec<String>,
    edges: Vec<((String, String), Totals)>,
    edge_index: HashMap<(String, String), usize>,
    lines: Vec<(u32, String, Totals)>,
    line_index: HashMap<u32, usize>,
    variable_changes: usize,
    event_count: usize,
}

impl TraceAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        let mut aggregator = Self::default();
        aggregator.node(GLOBAL_CALLER);
        aggregator
    }

    /// Fold in one event.
    pub fn record(&mut self, event: &TraceEvent) {
        self.event_count += 1;
        match event {
            TraceEvent::Memory(sample) => self.record_memory(sample),
            TraceEvent::FunctionCall(call) => self.record_call(call),
            TraceEvent::VariableState(_) => self.variable_changes += 1,
            TraceEvent::LineExecution(line) => self.record_line(line),
        }
    }

    /// Fold in a sequence of events.
    pub fn record_all<'a>(&mut self, events: impl IntoIterator<Item = &'a TraceEvent>) {
        for event in events {
            self.record(event);
        }
    }

    fn record_memory(&mut self, sample: &MemorySample) {
        self.peak_rss = self.peak_rss.max(sample.rss);
    }

    fn record_call(&mut self, call: &FunctionCall) {
        let index = match self.function_index.get(&call.name) {
            Some(&i) => i,
            None => {
                self.functions.push((call.name.clone(), Totals::default()));
                self.function_index
                    .insert(call.name.clone(), self.functions.len() - 1);
                self.functions.len() - 1
            }
        };
        self.functions[index].1.add(call.duration_ms);

        let source = call.caller_or_global();
        self.node(source);
        self.node(&call.name);

        let key = (source.to_string(), call.name.clone());
        let index = match self.edge_index.get(&key) {
            Some(&i) => i,
            None => {
                self.edges.push((key.clone(), Totals::default()));
                self.edge_index.insert(key, self.edges.len() - 1);
                self.edges.len() - 1
            }
        };
        self.edges[index].1.add(call.duration_ms);
    }

    fn record_line(&mut self, line: &LineExecution) {
        let index = match self.line_index.get(&line.line) {
            Some(&i) => i,
            None => {
                self.lines
                    .push((line.line, line.source.clone(), Totals::default()));
                self.line_index.insert(line.line, self.lines.len() - 1);
                self.lines.len() - 1
            }
        };
        let entry = &mut self.lines[index];
        if entry.1.is_empty() && !line.source.is_empty() {
            entry.1 = line.source.clone();
        }
        entry.2.add(line.duration_ms);
    }

    fn node(&mut self, name: &str) {
        if !self.nodes.iter().any(|n| n == name) {
            self.nodes.push(name.to_string());
        }
    }

    /// Replace call counters and raise the memory peak from running totals.
    ///
    /// Totals without calls leave the call counters untouched.
    pub fn apply_totals(&mut self, totals: &TraceTotals) {
        self.peak_rss = self.peak_rss.max(totals.peak_memory_bytes);
        if totals.calls.is_empty() {
            return;
        }

        self.functions.clear();
        self.function_index.clear();
        self.edges.clear();
        self.edge_index.clear();
        self.nodes.clear();
        self.node(GLOBAL_CALLER);

        for total in &totals.calls {
            let index = match self.function_index.get(&total.name) {
                Some(&i) => i,
                None => {
                    self.functions.push((total.name.clone(), Totals::default()));
                    self.function_index
                        .insert(total.name.clone(), self.functions.len() - 1);
                    self.functions.len() - 1
                }
            };
            self.functions[index].1.merge(total.call_count, total.total_duration_ms);

            let source = total.caller.as_deref().unwrap_or(GLOBAL_CALLER);
            self.node(source);
            self.node(&total.name);

            let key = (source.to_string(), total.name.clone());
            let index = match self.edge_index.get(&key) {
                Some(&i) => i,
                None => {
                    self.edges.push((key.clone(), Totals::default()));
                    self.edge_index.insert(key, self.edges.len() - 1);
                    self.edges.len() - 1
                }
            };
            self.edges[index].1.merge(total.call_count, total.total_duration_ms);
        }
    }

    /// Number of events folded in so far.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Produce the metrics for a run that took `execution_time_ms`.
    pub fn finish(self, execution_time_ms: f64) -> TraceMetrics {
        let functions: Vec<FunctionStats> = self
            .functions
            .iter()
            .map(|(name, totals)| FunctionStats {
                name: name.clone(),
                call_count: totals.count,
                total_duration_ms: totals.total_ms,
                average_duration_ms: totals.average(),
            })
            .collect();

        // Strictly greater, so the first-seen name wins ties.
        let mut most_expensive: Option<&FunctionStats> = None;
        for stats in &functions {
            if most_expensive.is_none_or(|best| stats.total_duration_ms > best.total_duration_ms) {
                most_expensive = Some(stats);
            }
        }

        let summary = MetricsSummary {
            execution_time_ms: if execution_time_ms.is_finite() {
                execution_time_ms.max(0.0)
            } else {
                0.0
            },
            peak_memory_bytes: self.peak_rss,
            total_function_calls: functions.iter().map(|f| f.call_count).sum(),
            unique_function_count: functions.len(),
            most_expensive_function: most_expensive.map(|f| ExpensiveFunction {
                name: f.name.clone(),
                total_duration_ms: f.total_duration_ms,
            }),
        };

        let edges = self
            .edges
            .into_iter()
            .map(|((source, target), totals)| CallEdge {
                source,
                target,
                call_count: totals.count,
                total_duration_ms: totals.total_ms,
                average_duration_ms: totals.average(),
            })
            .collect();

        let mut heatmap: Vec<HeatmapEntry> = self
            .lines
            .into_iter()
            .filter(|(_, _, totals)| totals.count > 1)
            .map(|(line, source, totals)| HeatmapEntry {
                line,
                source,
                execution_count: totals.count,
                total_duration_ms: totals.total_ms,
                average_duration_ms: totals.average(),
            })
            .collect();
        heatmap.sort_by(|a, b| {
            b.total_duration_ms
                .total_cmp(&a.total_duration_ms)
                .then(a.line.cmp(&b.line))
        });

        TraceMetrics {
            summary,
            functions,
            call_graph: CallGraph {
                nodes: self.nodes,
                edges,
            },
            heatmap,
            complexity: estimate_complexity(&[]),
            variable_changes: self.variable_changes,
            event_count: self.event_count,
        }
    }
}

/// Aggregate a complete trace.
pub fn aggregate(trace: &[TraceEvent], execution_time_ms: f64) -> TraceMetrics {
    let mut aggregator = TraceAggregator::new();
    aggregator.record_all(trace);
    aggregator.finish(execution_time_ms)
}

/// Aggregate a successful run, preferring its running totals.
pub fn aggregate_success(success: &ExecutionSuccess) -> TraceMetrics {
    let mut aggregator = TraceAggregator::new();
    aggregator.record_all(&success.trace);
    if let Some(totals) = &success.totals {
        aggregator.apply_totals(totals);
    }
    aggregator.finish(success.total_duration_ms)
}
