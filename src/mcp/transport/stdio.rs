//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and talks to it over its stdin/stdout pipes using newline-delimited
//! JSON. This is the standard transport for locally-installed MCP servers.
//!
//! # Protocol
//!
//! - Outbound requests are written to the child's stdin as one JSON object
//!   followed by `\n`.
//! - Inbound lines on stdout are parsed as JSON-RPC; responses resolve the
//!   pending entry with the same id. Notifications and non-JSON lines are
//!   logged and ignored. Server-initiated `ping` gets an empty result; any
//!   other server request gets `-32601`.
//! - The child's stderr is logged via `tracing::debug!` and never treated
//!   as an error.
//!
//! # Lifecycle
//!
//! [`Transport::start`] spawns the child and four background tasks (stdin
//! writer, stdout reader, stderr drain, and an exit monitor that owns the
//! [`Child`]). Each spawn is a new *generation*; exit events from an older
//! generation are ignored.
//!
//! # Liveness
//!
//! Every `send` that times out bumps a consecutive-timeout counter; any
//! successful response resets it. At [`LIVENESS_THRESHOLD`] the child is
//! force-terminated (SIGTERM, then SIGKILL after the grace period) and the
//! transport is marked disconnected. An unexpected exit fires the
//! disconnect callbacks once and the transport stays down until `start` is
//! called again.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::config::StdioTransportConfig;
use crate::mcp::pending::{PendingTable, SettleFailure};
use crate::mcp::transport::{
    DisconnectCallback, DisconnectNotifier, DisconnectReason, Transport, LIVENESS_THRESHOLD,
};
use crate::mcp::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// State shared between the transport and its background tasks.
#[derive(Debug, Default)]
struct Shared {
    pending: PendingTable,
    notifier: DisconnectNotifier,
    connected: AtomicBool,
    stopping: AtomicBool,
    generation: AtomicU64,
}

/// Handles for one spawned child.
#[derive(Debug)]
struct ProcessRun {
    stdin_tx: mpsc::UnboundedSender<String>,
    kill: CancellationToken,
    monitor: JoinHandle<()>,
    pid: Option<u32>,
}

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use xzatoma_mcp::mcp::config::StdioTransportConfig;
/// use xzatoma_mcp::mcp::transport::{stdio::StdioTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::new(
///     StdioTransportConfig {
///         command: "npx".into(),
///         args: vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///         env: Default::default(),
///         cwd: None,
///     },
///     Duration::from_secs(2),
/// );
/// transport.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    config: StdioTransportConfig,
    kill_grace: Duration,
    shared: Arc<Shared>,
    consecutive_timeouts: AtomicU32,
    run: Mutex<Option<ProcessRun>>,
}

impl StdioTransport {
    /// Create a transport for `config`. Nothing is spawned until
    /// [`Transport::start`].
    ///
    /// `kill_grace` is the time between SIGTERM and SIGKILL when the child
    /// has to be force-terminated.
    pub fn new(config: StdioTransportConfig, kill_grace: Duration) -> Self {
        Self {
            config,
            kill_grace,
            shared: Arc::new(Shared::default()),
            consecutive_timeouts: AtomicU32::new(0),
            run: Mutex::new(None),
        }
    }

    /// PID of the current child, if one is running.
    pub async fn pid(&self) -> Option<u32> {
        self.run.lock().await.as_ref().and_then(|r| r.pid)
    }

    /// Current value of the consecutive-timeout counter.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::SeqCst)
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.cwd {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            McpError::Connection(format!(
                "failed to spawn MCP server `{}`: {}",
                self.config.command, e
            ))
            .into()
        })
    }

    async fn trip_liveness(&self, count: u32) {
        tracing::warn!(
            command = %self.config.command,
            count,
            "MCP server stopped answering; terminating process"
        );
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared
            .notifier
            .fire(DisconnectReason::ConsecutiveTimeouts { count });
        if let Some(run) = self.run.lock().await.as_ref() {
            run.kill.cancel();
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() && self.is_connected() {
            return Ok(());
        }

        // Reap a previous child that crashed or was killed by the liveness
        // policy before spawning a new one.
        if let Some(old) = run.take() {
            old.kill.cancel();
            if let Err(e) = old.monitor.await {
                tracing::debug!(error = %e, "Previous MCP server monitor ended abnormally");
            }
        }

        let mut child = self.spawn_child()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Connection("child stderr unavailable after spawn".into()))?;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<String>();
        let kill = CancellationToken::new();

        tokio::spawn(write_stdin(stdin, stdin_rx));
        tokio::spawn(read_stdout(
            stdout,
            self.shared.pending.clone(),
            stdin_tx.clone(),
        ));
        tokio::spawn(drain_stderr(stderr, self.config.command.clone()));
        let monitor = tokio::spawn(monitor_child(
            child,
            kill.clone(),
            self.kill_grace,
            Arc::clone(&self.shared),
            generation,
            self.config.command.clone(),
        ));

        self.consecutive_timeouts.store(0, Ordering::SeqCst);
        self.shared.notifier.arm();
        self.shared.connected.store(true, Ordering::SeqCst);
        *run = Some(ProcessRun {
            stdin_tx,
            kill,
            monitor,
            pid,
        });

        tracing::info!(command = %self.config.command, pid = ?pid, "MCP server process started");
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.config.command.clone()).into());
        }
        let stdin_tx = self
            .run
            .lock()
            .await
            .as_ref()
            .map(|r| r.stdin_tx.clone())
            .ok_or_else(|| McpError::NotConnected(self.config.command.clone()))?;

        let line = serde_json::to_string(&request).map_err(McpError::from)?;
        let mut guard = self
            .shared
            .pending
            .register(request.id.clone(), &request.method, timeout)?;
        tracing::debug!(id = %request.id, method = %request.method, "MCP stdio request");
        stdin_tx
            .send(line)
            .map_err(|_| McpError::ConnectionLost("MCP server stdin closed".to_string()))?;

        match guard.wait().await {
            Ok(response) => {
                self.consecutive_timeouts.store(0, Ordering::SeqCst);
                Ok(response)
            }
            Err(err) if err.is_timeout() => {
                let count = self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(id = %request.id, count, "MCP stdio request timed out");
                if count == LIVENESS_THRESHOLD {
                    self.trip_liveness(count).await;
                }
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.config.command.clone()).into());
        }
        let line = serde_json::to_string(&notification).map_err(McpError::from)?;
        let run = self.run.lock().await;
        let run = run
            .as_ref()
            .ok_or_else(|| McpError::NotConnected(self.config.command.clone()))?;
        run.stdin_tx
            .send(line)
            .map_err(|_| McpError::ConnectionLost("MCP server stdin closed".to_string()))?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        let old = self.run.lock().await.take();
        self.shared.pending.fail_all(SettleFailure::Stopped);

        if let Some(old) = old {
            old.kill.cancel();
            if let Err(e) = old.monitor.await {
                tracing::debug!(error = %e, "MCP server monitor ended abnormally");
            }
            tracing::info!(command = %self.config.command, "MCP server process stopped");
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        self.shared.notifier.register(callback);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child. The monitor task performs the
    /// SIGTERM/SIGKILL escalation; `kill_on_drop` covers the case where the
    /// runtime is already gone.
    fn drop(&mut self) {
        if let Ok(run) = self.run.try_lock() {
            if let Some(run) = run.as_ref() {
                run.kill.cancel();
            }
        }
    }
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(msg) = rx.recv().await {
        let line = format!("{}\n", msg);
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "MCP server stdin write failed");
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn read_stdout(
    stdout: ChildStdout,
    pending: PendingTable,
    stdin_tx: mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "MCP server stdout read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match JsonRpcMessage::parse(&line) {
            Ok(JsonRpcMessage::Response(response)) => {
                pending.resolve(response);
            }
            Ok(JsonRpcMessage::Request(request)) => {
                let reply = if request.method == "ping" {
                    JsonRpcResponse::success(request.id, serde_json::json!({}))
                } else {
                    tracing::debug!(method = %request.method, "Rejecting server-initiated request");
                    JsonRpcResponse::failure(request.id, -32601, "Method not found")
                };
                if let Ok(line) = serde_json::to_string(&reply) {
                    let _ = stdin_tx.send(line);
                }
            }
            Ok(JsonRpcMessage::Notification(n)) => {
                tracing::debug!(method = %n.method, "MCP server notification ignored");
            }
            Err(e) => {
                tracing::debug!(error = %e, line = %line, "Ignoring non-JSON-RPC stdout line");
            }
        }
    }
}

async fn drain_stderr(stderr: ChildStderr, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(
            target: "xzatoma_mcp::mcp::transport::stdio",
            command = %command,
            "mcp server stderr: {}",
            line
        );
    }
}

async fn monitor_child(
    mut child: Child,
    kill: CancellationToken,
    grace: Duration,
    shared: Arc<Shared>,
    generation: u64,
    command: String,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => terminate(&mut child, grace).await,
    };

    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    shared.connected.store(false, Ordering::SeqCst);
    if shared.stopping.load(Ordering::SeqCst) {
        return;
    }

    let code = status.as_ref().ok().and_then(ExitStatus::code);
    let detail = match code {
        Some(code) => format!("MCP server `{}` exited with code {}", command, code),
        None => format!("MCP server `{}` terminated", command),
    };
    let failed = shared
        .pending
        .fail_all(SettleFailure::ConnectionLost(detail.clone()));
    if shared.notifier.fire(DisconnectReason::ProcessExited { code }) {
        tracing::warn!(pending = failed, "{}", detail);
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a valid process ID obtained from tokio::process::Child
            // and the child has not been reaped yet.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => tracing::warn!(pid, "MCP server ignored SIGTERM; sending SIGKILL"),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    child.wait().await
}
