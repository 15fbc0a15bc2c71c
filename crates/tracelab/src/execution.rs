//! Driving one execution from instrumentation to its final report.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tracelab_core::{
    ExecutionContext, ExecutionError, ExecutionFailure, ExecutionId, ExecutionOutcome,
    ExecutionRequest, ExecutionResult, FailureKind, SharedHandler, TraceEvent,
};
use tracelab_observe::{ExecutionReport, LiveEvent, aggregate, aggregate_success};

use crate::error::{TraceLabError, TraceLabResult};

/// A submitted execution.
///
/// The live feed ends after its `complete` or `error` event. Dropping the
/// feed does not cancel the execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    /// Execution ID.
    pub id: ExecutionId,
    /// Live events of this execution, in emission order.
    pub events: mpsc::UnboundedReceiver<LiveEvent>,
    /// Resolves once with the report or the error that ended the run.
    pub result: oneshot::Receiver<ExecutionResult<ExecutionReport>>,
}

impl ExecutionHandle {
    /// Next live event, or `None` once the feed is closed.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    /// Wait for the report, discarding live events.
    pub async fn wait(self) -> TraceLabResult<ExecutionReport> {
        let ExecutionHandle { id, events, result } = self;
        drop(events);
        match result.await {
            Ok(result) => result.map_err(TraceLabError::from),
            Err(_) => Err(TraceLabError::Lost(id)),
        }
    }
}

/// Table of execution ids with a live sandbox.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight {
    table: Arc<DashMap<ExecutionId, Instant>>,
}

impl InFlight {
    /// Reserve `id`; the reservation ends when the guard drops.
    pub(crate) fn claim(&self, id: &ExecutionId) -> ExecutionResult<InFlightGuard> {
        match self.table.entry(id.clone()) {
            Entry::Occupied(_) => Err(ExecutionError::DuplicateExecution(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(InFlightGuard {
                    table: Arc::clone(&self.table),
                    id: id.clone(),
                })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

/// Releases an in-flight reservation on drop.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    table: Arc<DashMap<ExecutionId, Instant>>,
    id: ExecutionId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some((_, since)) = self.table.remove(&self.id) {
            debug!(
                execution_id = %self.id,
                held_ms = since.elapsed().as_secs_f64() * 1000.0,
                "Released execution id"
            );
        }
    }
}

/// An admitted request: resolved handler and reserved id.
pub(crate) struct Admitted {
    pub(crate) handler: SharedHandler,
    pub(crate) request: ExecutionRequest,
    pub(crate) guard: InFlightGuard,
}

/// Run an admitted request to its report.
///
/// `publish` sees every live event of the run in order; exactly one
/// terminal event is published last.
pub(crate) async fn drive<F>(
    admitted: Admitted,
    channel_capacity: usize,
    mut publish: F,
) -> ExecutionResult<ExecutionReport>
where
    F: FnMut(LiveEvent) + Send,
{
    let Admitted {
        handler,
        request,
        guard,
    } = admitted;
    let id = request.id.clone();
    let language = handler.id();
    let started = Instant::now();

    let program = match handler.instrument(&request.source, &request.options) {
        Ok(program) => program,
        Err(ExecutionError::InstrumentationFailure { reason }) => {
            warn!(execution_id = %id, language, reason = reason.as_str(), "Instrumentation failed");
            drop(guard);
            let mut failure = ExecutionFailure::new(FailureKind::InstrumentationFailure, reason);
            failure.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            publish(LiveEvent::error(failure_message(&failure)));
            return Ok(ExecutionReport::from_outcome(
                id,
                language,
                ExecutionOutcome::Failure(failure),
            ));
        }
        Err(err) => {
            drop(guard);
            publish(LiveEvent::error(err.to_string()));
            return Err(err);
        }
    };
    if program.degraded {
        warn!(execution_id = %id, language, "Running snippet without inline hooks");
    }
    publish(LiveEvent::instrumented());

    let ctx = ExecutionContext::from_request(&request, handler.default_timeout());
    let timeout_ms = ctx.timeout.as_millis() as u64;
    info!(execution_id = %id, language, timeout_ms, "Execution started");

    let (events_tx, mut events_rx) = mpsc::channel::<TraceEvent>(channel_capacity.max(1));
    let mut buffered = Vec::new();
    let result = {
        let execution = handler.execute(&program, ctx, events_tx);
        tokio::pin!(execution);
        loop {
            tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    buffered.push(event.clone());
                    publish(LiveEvent::update(event));
                }
                result = &mut execution => break result,
            }
        }
    };
    while let Some(event) = events_rx.recv().await {
        buffered.push(event.clone());
        publish(LiveEvent::update(event));
    }
    drop(guard);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(execution_id = %id, language, error = %err, "Execution aborted");
            publish(LiveEvent::error(err.to_string()));
            return Err(err);
        }
    };

    // A failed run has no final payload; its metrics come from the live events.
    let metrics = match &outcome {
        ExecutionOutcome::Success(success) => aggregate_success(success),
        ExecutionOutcome::Failure(failure) => aggregate(&buffered, failure.elapsed_ms),
    };
    info!(
        execution_id = %id,
        language,
        success = outcome.is_success(),
        duration_ms = outcome.duration_ms(),
        events = buffered.len(),
        "Execution finished"
    );

    let terminal = match &outcome {
        ExecutionOutcome::Success(_) => LiveEvent::complete(outcome.clone(), metrics.clone()),
        ExecutionOutcome::Failure(failure) => LiveEvent::error(failure_message(failure)),
    };

    let mut report = ExecutionReport::new(id, language, outcome, metrics);
    if program.degraded {
        report.add_warning("Snippet could not be rewritten; call and variable tracing is incomplete");
    }
    report.add_info(format!(
        "Inserted {} function, {} variable and {} line hooks",
        program.stats.functions, program.stats.variables, program.stats.lines
    ));

    publish(terminal);
    Ok(report)
}

fn failure_message(failure: &ExecutionFailure) -> String {
    match failure.source_line {
        Some(line) => format!("{} at line {line}: {}", failure.kind, failure.message),
        None => format!("{}: {}", failure.kind, failure.message),
    }
}
