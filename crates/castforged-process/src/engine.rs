//! Async supervision of external processes.
//!
//! [`ProcessEngine::execute`] spawns one command, drains both output pipes
//! concurrently, and races the child against its timeout, the caller's
//! cancellation token and external [`terminate`](ProcessEngine::terminate)
//! requests. Whichever fires first decides the [`ExitOutcome`]; on every path
//! the child is reaped, anything left in its process group is killed, and its
//! drainers are joined before the result is returned.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use castforged_common::SessionId;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::output::{drain, OutputLine, SharedCapture, Stream};
use crate::slot::{ProcessSlot, SlotState};
use crate::{ExitOutcome, ProcessError, ProcessRequest, ProcessResult, Result};

/// Default per-stream capture cap: 1 MiB.
pub const DEFAULT_OUTPUT_CAP: usize = 1024 * 1024;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum bytes kept from each of stdout and stderr.
    pub output_cap: usize,
    /// Time between the graceful termination signal and the forceful kill.
    pub grace_period: Duration,
    /// Time to wait for the child to disappear after the forceful kill.
    pub kill_wait: Duration,
    /// Number of processes allowed to run at once.
    pub max_concurrent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_cap: DEFAULT_OUTPUT_CAP,
            grace_period: Duration::from_secs(5),
            kill_wait: Duration::from_secs(3),
            max_concurrent: 5,
        }
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub total_started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub spawn_errors: u64,
    pub active: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    spawn_errors: AtomicU64,
}

impl Counters {
    fn record(&self, exit: ExitOutcome) {
        let counter = match exit {
            ExitOutcome::Exited(0) => &self.succeeded,
            ExitOutcome::Exited(_) | ExitOutcome::Signaled(_) => &self.failed,
            ExitOutcome::TimedOut => &self.timed_out,
            ExitOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type ProcessTable = Mutex<HashMap<SessionId, Arc<ProcessSlot>>>;

/// Removes a session from the process table when the supervising future
/// finishes or is dropped.
struct TableEntry<'a> {
    table: &'a ProcessTable,
    session_id: SessionId,
    slot: Arc<ProcessSlot>,
}

impl Drop for TableEntry<'_> {
    fn drop(&mut self) {
        self.table.lock().remove(&self.session_id);
    }
}

/// Why the supervising select loop stopped waiting.
enum Stop {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns and supervises external processes.
///
/// The engine is meant to be constructed once and shared (usually behind an
/// `Arc`) by every recorder in the process.
#[derive(Debug)]
pub struct ProcessEngine {
    config: EngineConfig,
    permits: Semaphore,
    table: ProcessTable,
    counters: Counters,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            config,
            permits,
            table: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `request` to completion.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Spawn`] if the executable cannot be launched.
    /// - [`ProcessError::Io`] if waiting on the child or draining a pipe
    ///   fails; the child has been killed and reaped by then.
    pub async fn execute(
        &self,
        request: ProcessRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessResult> {
        self.execute_observed(request, cancel, None).await
    }

    /// Like [`execute`](Self::execute), forwarding every output line to
    /// `observer` as it arrives.
    pub async fn execute_observed(
        &self,
        request: ProcessRequest,
        cancel: &CancellationToken,
        observer: Option<UnboundedSender<OutputLine>>,
    ) -> Result<ProcessResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit
                .map_err(|_| ProcessError::Io(std::io::Error::other("engine is shut down")))?,
            _ = cancel.cancelled() => {
                tracing::debug!(command = %request.display_command(), "Cancelled before spawn");
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                return Ok(ProcessResult {
                    session_id: SessionId::new(),
                    pid: None,
                    exit: ExitOutcome::Cancelled,
                    stdout: String::new(),
                    stderr: String::new(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    started_at,
                    finished_at: Utc::now(),
                    duration: start.elapsed(),
                });
            }
        };

        let mut child = self.spawn(&request)?;
        let session_id = SessionId::new();
        let pid = child.id();
        let entry = self.register(session_id, pid);
        self.counters.total_started.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            session_id = %session_id,
            pid = ?pid,
            command = %request.display_command(),
            "Process started"
        );

        let cap = self.config.output_cap;
        let stdout = SharedCapture::default();
        let stderr = SharedCapture::default();
        let stdout_task = tokio::spawn(drain(
            child.stdout.take(),
            Stream::Stdout,
            cap,
            stdout.clone(),
            observer.clone(),
        ));
        let stderr_task = tokio::spawn(drain(
            child.stderr.take(),
            Stream::Stderr,
            cap,
            stderr.clone(),
            observer,
        ));

        let deadline = async {
            match request.timeout() {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            _ = deadline => Stop::TimedOut,
            _ = cancel.cancelled() => Stop::Cancelled,
            _ = entry.slot.termination_requested() => Stop::Cancelled,
        };

        let (status, exit) = match stop {
            Stop::Exited(status) => {
                let exit = status.as_ref().map(exit_outcome).unwrap_or(ExitOutcome::Signaled(0));
                (status, exit)
            }
            Stop::TimedOut => {
                tracing::warn!(
                    session_id = %session_id,
                    timeout = ?request.timeout(),
                    "Process exceeded its timeout, terminating"
                );
                (self.shutdown(&mut child, &entry.slot).await, ExitOutcome::TimedOut)
            }
            Stop::Cancelled => {
                tracing::info!(session_id = %session_id, "Cancellation requested, terminating process");
                (self.shutdown(&mut child, &entry.slot).await, ExitOutcome::Cancelled)
            }
        };
        entry.slot.mark_reaped();

        // Background helpers of the tool would otherwise outlive it and hold
        // the pipes open.
        if let Some(pid) = pid {
            if signal_group(pid, Signal::Kill) {
                tracing::debug!(session_id = %session_id, pid, "Killed processes left in the group");
            }
        }

        let drained = self
            .join_drainers(session_id, (stdout_task, stdout), (stderr_task, stderr))
            .await;

        // Report a wait failure only after the drainers are done with the pipes.
        let status = status?;
        let (stdout, stderr) = drained?;
        let (stdout, stdout_truncated) = stdout;
        let (stderr, stderr_truncated) = stderr;

        self.counters.record(exit);

        let result = ProcessResult {
            session_id,
            pid,
            exit,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            started_at,
            finished_at: Utc::now(),
            duration: start.elapsed(),
        };

        tracing::info!(
            session_id = %session_id,
            status = %status,
            outcome = %exit,
            duration_ms = result.duration.as_millis() as u64,
            "Process finished"
        );

        Ok(result)
    }

    /// Request graceful termination of a running session.
    ///
    /// Returns `false` when the session is unknown, already terminating, or
    /// already reaped; repeated calls are harmless.
    pub fn terminate(&self, session_id: SessionId) -> bool {
        let slot = self.table.lock().get(&session_id).cloned();
        match slot {
            Some(slot) => {
                let requested = slot.request_termination();
                if requested {
                    tracing::info!(session_id = %session_id, "Termination requested");
                }
                requested
            }
            None => false,
        }
    }

    /// Request termination of every running session. Returns how many
    /// requests took effect.
    pub fn terminate_all(&self) -> usize {
        let slots: Vec<_> = self.table.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.request_termination()).count()
    }

    /// State of a session, or `None` once it has left the process table.
    pub fn session_state(&self, session_id: SessionId) -> Option<SlotState> {
        self.table.lock().get(&session_id).map(|slot| slot.state())
    }

    /// Sessions currently registered in the process table.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.table.lock().keys().copied().collect()
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            total_started: c.total_started.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            spawn_errors: c.spawn_errors.load(Ordering::Relaxed),
            active: self.table.lock().len() as u64,
        }
    }

    fn spawn(&self, request: &ProcessRequest) -> Result<Child> {
        let mut cmd = Command::new(request.program());
        cmd.args(request.args())
            .envs(request.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = request.working_dir() {
            cmd.current_dir(dir);
        }

        // Own process group, so termination reaches helpers the tool forks.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| {
            self.counters.spawn_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(program = %request.program(), error = %e, "Failed to spawn process");
            ProcessError::spawn(request.program(), e)
        })
    }

    fn register(&self, session_id: SessionId, pid: Option<u32>) -> TableEntry<'_> {
        let slot = Arc::new(ProcessSlot::new(pid));
        self.table.lock().insert(session_id, slot.clone());
        TableEntry {
            table: &self.table,
            session_id,
            slot,
        }
    }

    /// Graceful signal, grace window, forceful kill, reap.
    async fn shutdown(&self, child: &mut Child, slot: &ProcessSlot) -> std::io::Result<ExitStatus> {
        slot.begin_termination();

        if let Some(pid) = slot.pid() {
            signal_group(pid, Signal::Terminate);
        }

        if let Ok(status) = tokio::time::timeout(self.config.grace_period, child.wait()).await {
            return status;
        }

        tracing::warn!(pid = ?slot.pid(), grace = ?self.config.grace_period, "Process ignored SIGTERM, killing");
        if let Some(pid) = slot.pid() {
            signal_group(pid, Signal::Kill);
        }
        if let Err(e) = child.start_kill() {
            // The child was reaped between the grace timeout and here.
            tracing::debug!(pid = ?slot.pid(), error = %e, "start_kill failed");
        }

        match tokio::time::timeout(self.config.kill_wait, child.wait()).await {
            Ok(status) => status,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "process did not exit after kill",
            )),
        }
    }

    /// Wait for both drainers, then hand back what they captured.
    ///
    /// Drainers still blocked after the grace period are abandoned; the text
    /// they captured up to that point is kept.
    async fn join_drainers(
        &self,
        session_id: SessionId,
        stdout: (tokio::task::JoinHandle<std::io::Result<()>>, SharedCapture),
        stderr: (tokio::task::JoinHandle<std::io::Result<()>>, SharedCapture),
    ) -> Result<((String, bool), (String, bool))> {
        let (stdout_task, stdout) = stdout;
        let (stderr_task, stderr) = stderr;
        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();

        let joined = tokio::time::timeout(self.config.grace_period, async {
            tokio::join!(stdout_task, stderr_task)
        })
        .await;

        match joined {
            Ok((out, err)) => {
                out.map_err(|e| ProcessError::Io(std::io::Error::other(e)))??;
                err.map_err(|e| ProcessError::Io(std::io::Error::other(e)))??;
            }
            Err(_) => {
                // A descendant that left the process group is holding the pipes open.
                tracing::warn!(
                    session_id = %session_id,
                    "Output pipes still open after exit, keeping output captured so far"
                );
                stdout_abort.abort();
                stderr_abort.abort();
            }
        }

        let take = |capture: &SharedCapture| std::mem::take(&mut *capture.lock()).into_text();
        Ok((take(&stdout), take(&stderr)))
    }
}

fn exit_outcome(status: &ExitStatus) -> ExitOutcome {
    if let Some(code) = status.code() {
        return ExitOutcome::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitOutcome::Signaled(sig);
        }
    }
    ExitOutcome::Signaled(0)
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Signal every process in the group led by `pid`. Returns whether the
/// signal was delivered.
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> bool {
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) => true,
        Err(e) => {
            // ESRCH: the group is already gone.
            tracing::debug!(pid, signal = ?sig, error = %e, "killpg failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn quick_engine() -> ProcessEngine {
        ProcessEngine::new(EngineConfig {
            grace_period: Duration::from_millis(500),
            kill_wait: Duration::from_secs(2),
            ..EngineConfig::default()
        })
    }

    fn sh(script: &str) -> ProcessRequest {
        ProcessRequest::new(["sh", "-c", script]).unwrap()
    }

    #[cfg(unix)]
    fn is_running(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let engine = quick_engine();
        let result = engine
            .execute(sh("echo hello; echo oops >&2; exit 3"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit, ExitOutcome::Exited(3));
        assert!(!result.is_success());
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
        assert!(result.pid.is_some());
        assert!(engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn true_is_success() {
        let engine = quick_engine();
        let request = ProcessRequest::new(["true"]).unwrap();
        let result = engine.execute(request, &CancellationToken::new()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(engine.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let engine = quick_engine();
        let request = ProcessRequest::new(["nonexistent_tool_xyz_12345"]).unwrap();
        let err = engine.execute(request, &CancellationToken::new()).await.unwrap_err();
        assert_matches!(err, ProcessError::Spawn { .. });
        assert_eq!(engine.stats().spawn_errors, 1);
        assert_eq!(engine.stats().total_started, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_terminates_and_reaps() {
        let engine = quick_engine();
        let request = ProcessRequest::new(["sleep", "10"])
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let started = Instant::now();
        let result = engine.execute(request, &CancellationToken::new()).await.unwrap();

        assert!(result.timed_out());
        assert!(!result.is_success());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!is_running(result.pid.unwrap()));
        assert_eq!(engine.stats().timed_out, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_ignoring_child_is_killed() {
        let engine = quick_engine();
        let request = sh("trap '' TERM; sleep 10").with_timeout(Duration::from_millis(100));

        let started = Instant::now();
        let result = engine.execute(request, &CancellationToken::new()).await.unwrap();

        assert!(result.timed_out());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!is_running(result.pid.unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_terminates_promptly() {
        let engine = quick_engine();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = ProcessRequest::new(["sleep", "10"])
            .unwrap()
            .with_timeout(Duration::from_secs(10));
        let started = Instant::now();
        let result = engine.execute(request, &cancel).await.unwrap();

        assert!(result.cancelled());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!is_running(result.pid.unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_helper_is_killed_and_output_kept() {
        let engine = ProcessEngine::new(EngineConfig {
            grace_period: Duration::from_secs(5),
            ..EngineConfig::default()
        });

        let started = Instant::now();
        let result = engine
            .execute(
                sh("echo 'error: stream is offline' >&2; sleep 20 & exit 1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.exit, ExitOutcome::Exited(1));
        assert!(result.stderr.contains("stream is offline"), "{:?}", result.stderr);
        assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn abandoned_drainers_keep_captured_output() {
        let engine = quick_engine();
        let stdout = SharedCapture::default();
        let stderr = SharedCapture::default();
        stderr.lock().push(b"error: stream is offline\n", DEFAULT_OUTPUT_CAP);

        let stuck = || tokio::spawn(std::future::pending::<std::io::Result<()>>());
        let started = Instant::now();
        let ((out, _), (err, truncated)) = engine
            .join_drainers(SessionId::new(), (stuck(), stdout), (stuck(), stderr))
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(err, "error: stream is offline\n");
        assert!(!truncated);
        assert!(started.elapsed() >= engine.config().grace_period);
    }

    #[tokio::test]
    async fn cancelled_before_spawn() {
        let engine = quick_engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine
            .execute(ProcessRequest::new(["true"]).unwrap(), &cancel)
            .await
            .unwrap();
        assert!(result.cancelled());
        assert!(result.pid.is_none());
    }

    #[tokio::test]
    async fn truncates_large_output() {
        let engine = ProcessEngine::new(EngineConfig {
            output_cap: 64,
            ..EngineConfig::default()
        });
        let result = engine
            .execute(sh("i=0; while [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(result.stdout_truncated);
        assert_eq!(result.stdout.len(), 64);
        assert!(!result.stderr_truncated);
    }

    #[tokio::test]
    async fn observer_receives_lines() {
        let engine = quick_engine();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        engine
            .execute_observed(sh("echo one; echo two >&2"), &CancellationToken::new(), Some(tx))
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&OutputLine::Stdout("one".into())));
        assert!(lines.contains(&OutputLine::Stderr("two".into())));
    }

    #[tokio::test]
    async fn environment_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let engine = quick_engine();
        let request = sh("echo $CASTFORGED_TEST; pwd")
            .with_env("CASTFORGED_TEST", "marker")
            .with_working_dir(dir.path());
        let result = engine.execute(request, &CancellationToken::new()).await.unwrap();

        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("marker"));
        let pwd = lines.next().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(pwd).canonicalize().unwrap(), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_is_idempotent() {
        let engine = Arc::new(quick_engine());
        let runner = engine.clone();
        let handle = tokio::spawn(async move {
            runner
                .execute(ProcessRequest::new(["sleep", "10"]).unwrap(), &CancellationToken::new())
                .await
        });

        let session = loop {
            if let Some(id) = engine.active_sessions().first().copied() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert_eq!(engine.session_state(session), Some(SlotState::Running));
        assert!(engine.terminate(session));
        assert!(!engine.terminate(session));

        let result = handle.await.unwrap().unwrap();
        assert!(result.cancelled());
        assert_eq!(engine.session_state(session), None);
        assert!(!engine.terminate(session));
        assert!(!engine.terminate(SessionId::new()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_and_terminate_race_is_safe() {
        let engine = Arc::new(quick_engine());
        let runner = engine.clone();
        let handle = tokio::spawn(async move {
            let request = ProcessRequest::new(["sleep", "10"])
                .unwrap()
                .with_timeout(Duration::from_millis(50));
            runner.execute(request, &CancellationToken::new()).await
        });

        for _ in 0..20 {
            for id in engine.active_sessions() {
                engine.terminate(id);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let result = handle.await.unwrap().unwrap();
        assert!(result.timed_out() || result.cancelled());
        assert!(!is_running(result.pid.unwrap()));
        assert!(engine.active_sessions().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_all_stops_every_session() {
        let engine = Arc::new(quick_engine());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute(ProcessRequest::new(["sleep", "10"]).unwrap(), &CancellationToken::new())
                    .await
            }));
        }

        while engine.active_sessions().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.terminate_all(), 3);
        assert_eq!(engine.terminate_all(), 0);

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert!(result.cancelled());
            assert!(!is_running(result.pid.unwrap()));
        }
        assert_eq!(engine.stats().cancelled, 3);
    }

    #[tokio::test]
    async fn concurrent_executions_share_the_engine() {
        let engine = Arc::new(ProcessEngine::new(EngineConfig {
            max_concurrent: 2,
            ..EngineConfig::default()
        }));
        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute(sh(&format!("echo {i}")), &CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        let stats = engine.stats();
        assert_eq!(stats.total_started, 4);
        assert_eq!(stats.active, 0);
    }
}
