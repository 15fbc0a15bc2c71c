//! Sandbox execution environment.
//!
//! This module provides the `Sandbox` type: one isolated, time-bounded
//! interpreter process per execution. The sandbox owns the scratch
//! workspace, the child process and the output stream, and releases all of
//! them before it reports an outcome.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use tracelab_core::{
    EventSender, ExecutionContext, ExecutionId, ExecutionOutcome, InstrumentedProgram,
    ResourceLimits,
};
use tracelab_resource::{
    Deadline, DeadlineConfig, LimiterConfig, OutputLimiter, ScratchWorkspace,
    SharedTimeoutMonitor,
};

use crate::command::{SandboxCommand, resolve_program};
use crate::demux::{DemuxStats, ExitInfo, FrameDemux};
use crate::error::{HostError, HostResult};
use crate::state::{SandboxState, StateCell};

/// Longest stderr line kept for error messages, in characters.
const STDERR_LINE_MAX_CHARS: usize = 1000;

/// Default bound on one stdout line; frames carrying a full trace are large.
pub const DEFAULT_MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

/// Configuration for a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// How long a killed child may take to be reaped.
    pub grace_period: Duration,
    /// Output and event caps.
    pub limiter: LimiterConfig,
    /// Number of trailing stderr lines kept for crash reports.
    pub stderr_tail_lines: usize,
    /// Longest stdout line buffered; the rest of a longer line is discarded.
    pub max_line_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(250),
            limiter: LimiterConfig::default(),
            stderr_tail_lines: 20,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl SandboxConfig {
    /// Create a new sandbox configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the configuration from resource limits.
    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            grace_period: limits.grace_period,
            limiter: LimiterConfig::from_limits(limits),
            ..Self::default()
        }
    }

    /// Set the grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the output and event caps.
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }

    /// Set how many stderr lines are kept.
    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines.max(1);
        self
    }

    /// Set the longest stdout line buffered.
    pub fn with_max_line_bytes(mut self, bytes: usize) -> Self {
        self.max_line_bytes = bytes.max(1);
        self
    }
}

/// Metrics collected during sandbox execution.
#[derive(Debug, Clone, Default)]
pub struct SandboxMetrics {
    /// Wall-clock time from spawn to exit, in milliseconds.
    pub elapsed_ms: f64,
    /// How the child ended, if it was reaped.
    pub exit: Option<ExitInfo>,
    /// Demultiplexer counters.
    pub demux: DemuxStats,
    /// The live sink went away before the run ended.
    pub sink_closed: bool,
    /// Stdout lines cut at the line bound.
    pub overlong_lines: usize,
}

/// An isolated execution environment for one instrumented program.
///
/// # Example
///
/// ```ignore
/// use tracelab_host::{Sandbox, SandboxCommand, SandboxConfig};
///
/// let sandbox = Sandbox::new(ctx.id.clone(), SandboxConfig::default());
/// let command = SandboxCommand::new("python3").args(["-u", "-B"]);
/// let outcome = sandbox.execute(&program, &command, &ctx, &events).await?;
/// ```
pub struct Sandbox {
    id: ExecutionId,
    config: SandboxConfig,
    state: StateCell,
    workspace: Option<ScratchWorkspace>,
    script: Option<PathBuf>,
    monitor: Option<SharedTimeoutMonitor>,
    metrics: SandboxMetrics,
}

impl Sandbox {
    /// Create a sandbox in the `Created` state.
    pub fn new(id: ExecutionId, config: SandboxConfig) -> Self {
        debug!(execution_id = %id, "Created new sandbox");
        Self {
            state: StateCell::new(id.clone()),
            id,
            config,
            workspace: None,
            script: None,
            monitor: None,
            metrics: SandboxMetrics::default(),
        }
    }

    /// Report timeouts to a shared monitor.
    pub fn with_monitor(mut self, monitor: SharedTimeoutMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Get the execution ID.
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SandboxState {
        self.state.get()
    }

    /// A handle observing the lifecycle state.
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Get the execution metrics.
    pub fn metrics(&self) -> &SandboxMetrics {
        &self.metrics
    }

    /// Write the instrumented program into a fresh scratch workspace.
    pub async fn prepare(&mut self, program: &InstrumentedProgram) -> HostResult<()> {
        let workspace = ScratchWorkspace::create()?;
        let script = workspace
            .write_file(&program.file_name, &program.source)
            .await?;

        self.workspace = Some(workspace);
        self.script = Some(script);
        self.state.advance(SandboxState::Instrumented)?;

        debug!(
            execution_id = %self.id,
            language = program.language,
            bytes = program.len(),
            degraded = program.degraded,
            "Program prepared"
        );
        Ok(())
    }

    /// Prepare, run and clean up in one call.
    ///
    /// The scratch workspace and the child process are released before this
    /// returns, on every path.
    pub async fn execute(
        mut self,
        program: &InstrumentedProgram,
        command: &SandboxCommand,
        ctx: &ExecutionContext,
        events: &EventSender,
    ) -> HostResult<ExecutionOutcome> {
        let result = match self.prepare(program).await {
            Ok(()) => self.run(command, ctx, events).await,
            Err(e) => {
                self.state.finish(SandboxState::Failed);
                Err(e)
            }
        };
        self.cleanup();
        result
    }

    /// Run the prepared program to completion, failure or timeout.
    pub async fn run(
        &mut self,
        command: &SandboxCommand,
        ctx: &ExecutionContext,
        events: &EventSender,
    ) -> HostResult<ExecutionOutcome> {
        let (Some(workspace), Some(script)) = (self.workspace.as_ref(), self.script.as_ref()) else {
            return Err(HostError::InvalidTransition {
                from: self.state.get(),
                to: SandboxState::Running,
            });
        };

        let mut cmd = Command::new(resolve_program(&command.program));
        cmd.args(&command.args)
            .arg(script)
            .env_clear()
            .envs(command.environment(workspace.path()))
            .current_dir(workspace.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state.finish(SandboxState::Failed);
                return Err(HostError::Spawn {
                    program: command.program_name(),
                    source,
                });
            }
        };

        self.state.advance(SandboxState::Running)?;
        let deadline = Deadline::start(
            &DeadlineConfig::new(ctx.timeout).with_grace_period(self.config.grace_period),
        );
        if let Some(monitor) = &self.monitor {
            monitor.record_start();
        }

        info!(
            execution_id = %self.id,
            program = %command.program_name(),
            timeout_ms = ctx.timeout.as_millis() as u64,
            "Sandbox running"
        );

        let stdin = child.stdin.take().ok_or(HostError::MissingStream("stdin"))?;
        let stdout = child.stdout.take().ok_or(HostError::MissingStream("stdout"))?;
        let stderr = child.stderr.take().ok_or(HostError::MissingStream("stderr"))?;

        let stdin_task = tokio::spawn(feed_stdin(stdin, ctx.stdin_bytes()));
        let stderr_task = tokio::spawn(read_tail(stderr, self.config.stderr_tail_lines));

        let mut demux = FrameDemux::new(
            self.id.clone(),
            OutputLimiter::new(self.config.limiter.clone()),
        );
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let max_line = self.config.max_line_bytes.max(1);
        let mut sink_open = !events.is_closed();

        let expiry = tokio::time::sleep_until(deadline.expires_at());
        tokio::pin!(expiry);

        let mut expired = loop {
            buf.clear();
            tokio::select! {
                read = read_bounded_line(&mut reader, &mut buf, max_line) => match read {
                    Ok((0, _)) => break false,
                    Ok((consumed, cut)) => {
                        if cut {
                            self.metrics.overlong_lines += 1;
                            warn!(
                                execution_id = %self.id,
                                bytes = consumed,
                                max_line_bytes = max_line,
                                "Output line over the line bound, keeping its prefix"
                            );
                        }
                        let line = String::from_utf8_lossy(&buf);
                        let Some(event) = demux.push_line(&line) else {
                            continue;
                        };
                        if !sink_open {
                            continue;
                        }
                        tokio::select! {
                            sent = events.send(event) => {
                                if sent.is_err() {
                                    sink_open = false;
                                    debug!(execution_id = %self.id, "Event sink closed");
                                }
                            }
                            _ = &mut expiry => break true,
                        }
                    }
                    Err(e) => {
                        warn!(execution_id = %self.id, error = %e, "Failed reading program output");
                        break false;
                    }
                },
                _ = &mut expiry => break true,
            }
        };

        let mut exit = None;
        if !expired {
            match tokio::time::timeout_at(deadline.expires_at(), child.wait()).await {
                Ok(Ok(status)) => exit = Some(ExitInfo::from_status(status)),
                Ok(Err(e)) => {
                    self.state.finish(SandboxState::Failed);
                    stdin_task.abort();
                    stderr_task.abort();
                    return Err(HostError::Io(e));
                }
                Err(_) => expired = true,
            }
        }

        if expired {
            self.terminate(&mut child, &deadline).await;
        }
        stdin_task.abort();

        let stderr_tail = match tokio::time::timeout(self.config.grace_period, stderr_task).await {
            Ok(Ok(tail)) => tail,
            _ => Vec::new(),
        };

        self.metrics.elapsed_ms = deadline.elapsed_ms();
        self.metrics.demux = demux.stats();
        self.metrics.sink_closed = !sink_open;

        let (outcome, terminal) = if expired && !demux.has_terminal() {
            if let Some(monitor) = &self.monitor {
                monitor.record_timeout(&deadline);
            }
            (
                demux.timed_out(ctx.timeout.as_millis(), deadline.elapsed_ms()),
                SandboxState::TimedOut,
            )
        } else {
            if expired {
                warn!(
                    execution_id = %self.id,
                    "Program reported completion but did not exit before the deadline"
                );
            }
            let exit = exit.clone().unwrap_or_else(|| ExitInfo {
                success: false,
                description: "forced termination".to_string(),
            });
            demux.finish(&exit, deadline.elapsed_ms(), &stderr_tail)
        };

        self.metrics.exit = exit;
        self.state.finish(terminal);

        info!(
            execution_id = %self.id,
            state = %terminal,
            duration_ms = self.metrics.elapsed_ms,
            events = self.metrics.demux.events,
            "Sandbox finished"
        );

        Ok(outcome)
    }

    /// Kill the child and wait for it within the grace period.
    async fn terminate(&self, child: &mut Child, deadline: &Deadline) {
        if let Err(e) = child.start_kill() {
            debug!(execution_id = %self.id, error = %e, "Kill signal not delivered");
        }

        match tokio::time::timeout(deadline.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(execution_id = %self.id, status = %status, "Killed sandbox reaped");
            }
            Ok(Err(e)) => {
                warn!(execution_id = %self.id, error = %e, "Failed to reap killed sandbox");
            }
            Err(_) => {
                if let Some(monitor) = &self.monitor {
                    monitor.record_slow_reap(deadline);
                } else {
                    warn!(execution_id = %self.id, "Sandbox not reaped within grace period");
                }
            }
        }
    }

    /// Remove the scratch workspace.
    fn cleanup(&mut self) {
        self.script = None;
        if let Some(workspace) = self.workspace.take() {
            if let Err(e) = workspace.close() {
                warn!(execution_id = %self.id, error = %e, "Scratch cleanup failed");
            }
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("metrics", &self.metrics)
            .finish()
    }
}

/// Write stdin and close it.
async fn feed_stdin(mut stdin: ChildStdin, bytes: Vec<u8>) {
    if !bytes.is_empty() {
        if let Err(e) = stdin.write_all(&bytes).await {
            // The program may exit without reading its input.
            debug!(error = %e, "Stdin not fully written");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

/// Keep the last `max_lines` lines of a stream.
async fn read_tail<R: AsyncRead + Unpin>(stream: R, max_lines: usize) -> Vec<String> {
    let mut reader = BufReader::new(stream);
    let mut tail = VecDeque::with_capacity(max_lines);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match read_bounded_line(&mut reader, &mut buf, STDERR_LINE_MAX_CHARS * 4).await {
            Ok((0, _)) | Err(_) => break,
            Ok(_) => {
                let line: String = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .chars()
                    .take(STDERR_LINE_MAX_CHARS)
                    .collect();
                if tail.len() == max_lines {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    }
    tail.into()
}

/// Read one line, keeping at most `max` bytes of it in `buf`.
///
/// Returns the bytes consumed, `0` at end of stream, and whether the line
/// was cut. The remainder of a cut line is consumed and dropped.
async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<(usize, bool)>
where
    R: AsyncBufRead + Unpin,
{
    let kept = (&mut *reader).take(max as u64).read_until(b'\n', buf).await?;
    if kept < max || buf.last() == Some(&b'\n') {
        return Ok((kept, false));
    }

    let mut skipped = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        skipped += used;
        if done {
            break;
        }
    }
    Ok((kept + skipped, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_core::{InstrumentationStats, TrackingOptions};
    use tokio::sync::mpsc;

    fn sh_available() -> bool {
        std::path::Path::new("/bin/sh").exists()
    }

    fn program(source: &str) -> InstrumentedProgram {
        InstrumentedProgram {
            language: "sh",
            source: source.to_string(),
            file_name: "main.sh".to_string(),
            original_lines: source.lines().count(),
            degraded: false,
            stats: InstrumentationStats::default(),
        }
    }

    fn ctx(timeout: Duration) -> ExecutionContext {
        ExecutionContext {
            id: ExecutionId::from("sandbox-test"),
            stdin: vec!["alpha".to_string(), "beta".to_string()],
            options: TrackingOptions::default(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_lines() {
        let data: &[u8] = b"one\ntwo\nthree\nfour\n";
        let tail = read_tail(data, 2).await;
        assert_eq!(tail, vec!["three".to_string(), "four".to_string()]);
    }

    #[tokio::test]
    async fn test_bounded_line_drops_overlong_tail() {
        let mut data: &[u8] = b"abcdefgh\nxy\ntail";
        let mut buf = Vec::new();

        let read = read_bounded_line(&mut data, &mut buf, 4).await.unwrap();
        assert_eq!(read, (9, true));
        assert_eq!(buf, b"abcd");

        buf.clear();
        let read = read_bounded_line(&mut data, &mut buf, 4).await.unwrap();
        assert_eq!(read, (3, false));
        assert_eq!(buf, b"xy\n");

        buf.clear();
        let read = read_bounded_line(&mut data, &mut buf, 4).await.unwrap();
        assert_eq!(read, (4, true));
        assert_eq!(buf, b"tail");

        buf.clear();
        assert_eq!(read_bounded_line(&mut data, &mut buf, 4).await.unwrap(), (0, false));
    }

    #[tokio::test]
    async fn test_read_tail_bounds_long_lines() {
        let mut data = vec![b'x'; 64 * 1024];
        data.extend_from_slice(b"\nlast\n");
        let tail = read_tail(data.as_slice(), 5).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].len(), STDERR_LINE_MAX_CHARS);
        assert_eq!(tail[1], "last");
    }

    #[tokio::test]
    async fn test_run_requires_prepare() {
        let mut sandbox = Sandbox::new(ExecutionId::from("t"), SandboxConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        let result = sandbox
            .run(&SandboxCommand::new("/bin/sh"), &ctx(Duration::from_secs(1)), &tx)
            .await;
        assert!(matches!(result, Err(HostError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_events_output_and_stdin() {
        if !sh_available() {
            return;
        }
        let source = r#"read first
echo "got $first"
echo '__TRACELAB_EVENT__{"event":"executionFlow","data":{"timestampMs":1,"line":1,"durationMs":0.5}}'
echo '__TRACELAB_RESULT__{"executionTime":3,"executionFlow":[{"timestampMs":1,"line":1,"durationMs":0.5}]}'
"#;
        let (tx, mut rx) = mpsc::channel(8);
        let sandbox = Sandbox::new(ExecutionId::from("t"), SandboxConfig::default());
        let outcome = sandbox
            .execute(
                &program(source),
                &SandboxCommand::new("/bin/sh"),
                &ctx(Duration::from_secs(5)),
                &tx,
            )
            .await
            .unwrap();

        let ExecutionOutcome::Success(success) = outcome else {
            panic!("Expected success, got {outcome:?}");
        };
        assert_eq!(success.output, "got alpha\n");
        assert_eq!(success.trace.len(), 1);
        assert_eq!(success.total_duration_ms, 3.0);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.timestamp_ms(), 1.0);
    }

    #[tokio::test]
    async fn test_timeout_enforced() {
        if !sh_available() {
            return;
        }
        let (tx, _rx) = mpsc::channel(8);
        let config = SandboxConfig::default().with_grace_period(Duration::from_millis(200));
        let sandbox = Sandbox::new(ExecutionId::from("t"), config);
        let state = sandbox.state_cell();

        let started = std::time::Instant::now();
        let outcome = sandbox
            .execute(
                &program("while true; do :; done\n"),
                &SandboxCommand::new("/bin/sh"),
                &ctx(Duration::from_millis(200)),
                &tx,
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(200 + 200 + 500));
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, tracelab_core::FailureKind::Timeout);
        assert_eq!(state.get(), SandboxState::TimedOut);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        if !sh_available() {
            return;
        }
        let (tx, _rx) = mpsc::channel(8);
        let sandbox = Sandbox::new(ExecutionId::from("t"), SandboxConfig::default());
        let outcome = sandbox
            .execute(
                &program("echo 'it broke' >&2\nexit 3\n"),
                &SandboxCommand::new("/bin/sh"),
                &ctx(Duration::from_secs(5)),
                &tx,
            )
            .await
            .unwrap();

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, tracelab_core::FailureKind::RuntimeError);
        assert_eq!(failure.message, "it broke");
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let (tx, _rx) = mpsc::channel(8);
        let sandbox = Sandbox::new(ExecutionId::from("t"), SandboxConfig::default());
        let result = sandbox
            .execute(
                &program("1"),
                &SandboxCommand::new("/nonexistent/tracelab-interpreter"),
                &ctx(Duration::from_secs(1)),
                &tx,
            )
            .await;
        assert!(matches!(result, Err(HostError::Spawn { .. })));
    }
}
