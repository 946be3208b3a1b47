//! Backend process supervision.
//!
//! Owns the single matcher process for the lifetime of the kiosk: spawn with
//! the transport-appropriate mode flag, pump stdout through the line codec,
//! mirror stderr into the log, and record the exit status when the process
//! goes away. There is deliberately no automatic respawn; a dead backend
//! leaves the kiosk in a degraded state until an operator restarts it.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use totem_config::{BackendConfig, Transport};
use totem_core::command::Command as BackendCommand;
use totem_core::{BackendEvent, Line, LineCodec, Result, TotemError, normalize};
use tracing::{debug, error, info, warn};

/// How long [`Supervisor::stop`] waits for the stream pumps to drain after
/// the process is gone. A descendant that inherited the pipes can hold them
/// open past the direct child's death; after this grace the pumps are
/// aborted.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether the supervised process is still running, and how it went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// The process exited with the given code, or `None` when killed by a
    /// signal.
    Exited(Option<i32>),
}

/// Outcome of a [`Supervisor::start`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    /// A previous start is still alive; `start` is idempotent while the
    /// process runs.
    AlreadyRunning { pid: Option<u32> },
}

/// Live handle to a spawned backend. Exactly one exists per running process;
/// dropping it without calling [`Supervisor::stop`] kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    exit: watch::Receiver<ExitState>,
    kill_tx: Option<oneshot::Sender<()>>,
    malformed_lines: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        matches!(*self.exit.borrow(), ExitState::Running)
    }

    pub fn exit_state(&self) -> ExitState {
        *self.exit.borrow()
    }

    /// Count of protocol lines that failed to parse since spawn.
    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines.load(Ordering::Relaxed)
    }
}

/// Spawns and tears down the matcher process, publishing every normalized
/// stdout event on a broadcast channel shared by the kiosk runtime and the
/// UI bridge.
#[derive(Debug)]
pub struct Supervisor {
    config: BackendConfig,
    events_tx: broadcast::Sender<BackendEvent>,
    handle: Option<ProcessHandle>,
}

impl Supervisor {
    pub fn new(config: BackendConfig, events_tx: broadcast::Sender<BackendEvent>) -> Self {
        Self {
            config,
            events_tx,
            handle: None,
        }
    }

    /// Subscribe to the normalized event stream. Late subscribers only see
    /// events published after they join.
    pub fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(ProcessHandle::is_alive)
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Launch the backend if it is not already running.
    ///
    /// The process is started with the mode flag matching the configured
    /// transport and its working directory set to the executable's parent,
    /// so the matcher finds its template store and database next to the
    /// binary. stdin is only piped on the pipe transport.
    pub fn start(&mut self) -> Result<StartOutcome> {
        if let Some(handle) = &self.handle
            && handle.is_alive()
        {
            debug!(pid = ?handle.pid, "backend already running, start is a no-op");
            return Ok(StartOutcome::AlreadyRunning { pid: handle.pid });
        }

        let executable = self
            .config
            .executable
            .clone()
            .ok_or_else(|| TotemError::Spawn("no backend executable configured".into()))?;

        let mut cmd = Command::new(&executable);
        cmd.arg(self.config.transport.mode_flag());
        if let Some(dir) = self.config.working_dir() {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(match self.config.transport {
            Transport::Pipe => Stdio::piped(),
            Transport::Http => Stdio::null(),
        });
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TotemError::Spawn(format!("{}: {e}", executable.display())))?;
        let pid = child.id();
        info!(
            pid,
            executable = %executable.display(),
            mode = self.config.transport.mode_flag(),
            "backend launched"
        );

        let stdin = child.stdin.take();
        let malformed_lines = Arc::new(AtomicU64::new(0));
        let mut tasks = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(pump_stdout(
                stdout,
                self.events_tx.clone(),
                malformed_lines.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(pump_stderr(stderr)));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        tasks.push(tokio::spawn(monitor(
            child,
            kill_rx,
            exit_tx,
            self.events_tx.clone(),
        )));

        self.handle = Some(ProcessHandle {
            pid,
            stdin,
            exit: exit_rx,
            kill_tx: Some(kill_tx),
            malformed_lines,
            tasks,
        });
        Ok(StartOutcome::Started { pid })
    }

    /// Kill the backend and wait for its exit to be recorded. Safe to call
    /// repeatedly; a second call with no live process is a no-op. Bounded:
    /// never blocks past the exit plus the pump drain grace.
    pub async fn stop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        // Close stdin before killing: a descendant that inherited the pipe
        // sees EOF instead of blocking on a read forever.
        drop(handle.stdin.take());
        if let Some(kill_tx) = handle.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if handle.is_alive() {
            let mut exit = handle.exit.clone();
            let _ = exit.changed().await;
        }
        // The kill only reaches the direct child, so an orphaned grandchild
        // may still hold the stdout pipe open; abort pumps that do not
        // drain within the grace period.
        for mut task in handle.tasks {
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        info!(pid = ?handle.pid, "backend stopped");
    }

    /// Write a command frame to the backend's stdin. Only valid on the pipe
    /// transport; HTTP commands go through the poll client instead.
    pub async fn send(&mut self, command: &BackendCommand) -> Result<()> {
        if self.config.transport != Transport::Pipe {
            return Err(TotemError::UnsupportedTransport("http"));
        }
        let handle = self.handle.as_mut().ok_or(TotemError::BackendGone)?;
        if !handle.is_alive() {
            return Err(TotemError::BackendGone);
        }
        let stdin = handle.stdin.as_mut().ok_or(TotemError::BackendGone)?;
        stdin.write_all(command.pipe_encoding().as_bytes()).await?;
        stdin.flush().await?;
        debug!(command = command.name(), "command written to backend stdin");
        Ok(())
    }
}

/// Read stdout in chunks, carrying partial lines across reads, and publish
/// each completed frame. Backend chunk boundaries carry no meaning.
async fn pump_stdout(
    mut stdout: ChildStdout,
    events_tx: broadcast::Sender<BackendEvent>,
    malformed_lines: Arc<AtomicU64>,
) {
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in codec.feed(&buf[..n]) {
                    dispatch_line(line, &events_tx, &malformed_lines);
                }
            }
            Err(e) => {
                warn!("backend stdout read failed: {e}");
                break;
            }
        }
    }
    if let Some(line) = codec.finish() {
        dispatch_line(line, &events_tx, &malformed_lines);
    }
}

fn dispatch_line(
    line: Line,
    events_tx: &broadcast::Sender<BackendEvent>,
    malformed_lines: &AtomicU64,
) {
    match line {
        Line::Event(value) => {
            let event = normalize(&value);
            debug!(kind = ?event.kind(), "backend event");
            let _ = events_tx.send(event);
        }
        Line::Diagnostic(text) => {
            info!(target: "backend", "{text}");
        }
        Line::Malformed { text, error } => {
            malformed_lines.fetch_add(1, Ordering::Relaxed);
            warn!(target: "backend", %error, "discarding malformed protocol line: {text}");
        }
    }
}

async fn pump_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        error!(target: "backend", "{line}");
    }
}

/// Wait for the child to exit, either on its own or because [`Supervisor::stop`]
/// asked for a kill. An unexpected exit is published as an opaque event so
/// the rest of the pipeline observes it without the kiosk screen reacting.
async fn monitor(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
    events_tx: broadcast::Sender<BackendEvent>,
) {
    let (status, killed) = tokio::select! {
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!("failed to kill backend: {e}");
            }
            (child.wait().await, true)
        }
        status = child.wait() => (status, false),
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!("failed to reap backend: {e}");
            None
        }
    };
    let _ = exit_tx.send(ExitState::Exited(code));

    if killed {
        info!(?code, "backend terminated");
    } else {
        warn!(?code, "backend exited unexpectedly");
        let _ = events_tx.send(BackendEvent::Raw {
            payload: json!({ "supervisor": "backend_exited", "code": code }),
        });
    }
}
