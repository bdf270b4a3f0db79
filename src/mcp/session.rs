//! Per-server session state
//!
//! A [`ServerSession`] pairs one transport (and the typed protocol wrapper
//! over it) with the state the adapter tracks for that server:
//!
//! ```text
//! Uninitialized --trigger--> Initializing --ok--> Ready
//!       ^                         |                 |
//!       |                         +--err--> Failed  |
//!       +----------------- disconnect --------------+
//! ```
//!
//! While initializing, the session holds a single shared in-flight handle.
//! Every trigger that arrives during that window joins the same handle
//! instead of starting a second handshake. The handle is cleared on both
//! success and failure, so a failed server is retried on the next trigger.
//!
//! A disconnect that lands while the handshake is in flight is remembered.
//! The attempt's result is then discarded and the session goes back to
//! uninitialized. Once closed by the adapter's shutdown, a session never
//! becomes ready again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};

use crate::error::{McpError, Result};
use crate::mcp::config::ServerConfig;
use crate::mcp::protocol::McpProtocol;
use crate::mcp::transport::{DisconnectReason, Transport};
use crate::mcp::types::{Implementation, McpTool};

/// Outcome of one shared initialization attempt: the registered tool names,
/// or the rendered failure. Cloneable so every joined trigger receives it.
pub type InitOutcome = std::result::Result<Vec<String>, String>;

const CLOSED_MESSAGE: &str = "adapter shut down";

/// Shared handle to an in-flight initialization.
pub type InitHandle = Shared<BoxFuture<'static, InitOutcome>>;

/// Lifecycle state of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No initialization attempted since start or the last disconnect
    Uninitialized,
    /// A shared initialization attempt is in flight
    Initializing,
    /// Tools discovered and registered
    Ready,
    /// The last attempt failed with this message
    Failed(String),
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Uninitialized => write!(f, "uninitialized"),
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Failed(_) => write!(f, "failed"),
        }
    }
}

/// What a trigger should do next, decided under the session lock.
pub(crate) enum Join {
    /// Already ready; here are the registered names
    Ready(Vec<String>),
    /// Await this handle
    Wait(InitHandle),
    /// The adapter shut down; nothing will start
    Closed,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    tools: Vec<McpTool>,
    registered: Vec<String>,
    in_flight: Option<InitHandle>,
    interrupted: Option<String>,
    closed: bool,
}

/// One configured, policy-permitted server and its transport.
pub struct ServerSession {
    name: String,
    config: ServerConfig,
    protocol: McpProtocol,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("name", &self.name)
            .field("kind", &self.config.transport.kind())
            .field("status", &self.status())
            .finish()
    }
}

impl ServerSession {
    /// Create an uninitialized session over `transport`.
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            protocol: McpProtocol::new(transport, request_timeout),
            state: Mutex::new(SessionState {
                status: SessionStatus::Uninitialized,
                tools: Vec::new(),
                registered: Vec::new(),
                in_flight: None,
                interrupted: None,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Server name as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The session's transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        self.protocol.transport()
    }

    /// Typed protocol wrapper over the transport.
    pub fn protocol(&self) -> &McpProtocol {
        &self.protocol
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.lock().status.clone()
    }

    /// Tools discovered by the last successful initialization.
    pub fn tools(&self) -> Vec<McpTool> {
        self.lock().tools.clone()
    }

    /// Registered (namespaced) tool names.
    pub fn registered_names(&self) -> Vec<String> {
        self.lock().registered.clone()
    }

    /// Returns the ready tool list, joins the in-flight attempt, or installs
    /// a new attempt built by `start` and returns its handle.
    ///
    /// `start` runs under the session lock and must only construct the
    /// future, never poll it.
    pub(crate) fn join_or_begin(&self, start: impl FnOnce() -> InitHandle) -> Join {
        let mut state = self.lock();
        if state.closed {
            return Join::Closed;
        }
        if state.status == SessionStatus::Ready {
            return Join::Ready(state.registered.clone());
        }
        if let Some(handle) = &state.in_flight {
            return Join::Wait(handle.clone());
        }
        let handle = start();
        state.status = SessionStatus::Initializing;
        state.in_flight = Some(handle.clone());
        state.interrupted = None;
        Join::Wait(handle)
    }

    /// Start the transport if needed, then run `initialize` and a full
    /// `tools/list`.
    pub(crate) async fn handshake(&self, client_info: Implementation) -> Result<Vec<McpTool>> {
        let transport = self.transport();
        if !transport.is_connected() {
            transport.start().await?;
        }
        let info = self.protocol.initialize(client_info).await?;
        tracing::info!(
            server = %self.name,
            remote = %info.server_info.name,
            protocol = %info.protocol_version,
            "MCP server initialized"
        );
        self.protocol.list_tools().await
    }

    /// Record a successful attempt and clear the in-flight handle.
    ///
    /// Fails, leaving the session not ready, when the transport went away
    /// during the attempt or the session was closed. The caller must then
    /// unregister whatever it registered for `registered`.
    pub(crate) fn mark_ready(
        &self,
        tools: Vec<McpTool>,
        registered: Vec<String>,
    ) -> std::result::Result<(), String> {
        let connected = self.transport().is_connected();
        let mut state = self.lock();
        state.in_flight = None;
        if state.closed {
            return Err(CLOSED_MESSAGE.to_string());
        }
        let interrupted = state.interrupted.take();
        if interrupted.is_some() || !connected {
            state.status = SessionStatus::Uninitialized;
            state.tools.clear();
            state.registered.clear();
            let reason = interrupted.unwrap_or_else(|| "transport not connected".to_string());
            return Err(format!(
                "transport disconnected during initialization: {}",
                reason
            ));
        }
        state.status = SessionStatus::Ready;
        state.tools = tools;
        state.registered = registered;
        Ok(())
    }

    /// Record a failed attempt and clear the in-flight handle.
    pub(crate) fn mark_failed(&self, message: String) {
        let mut state = self.lock();
        state.in_flight = None;
        state.interrupted = None;
        if state.closed {
            return;
        }
        state.status = SessionStatus::Failed(message);
        state.tools.clear();
        state.registered.clear();
    }

    /// Drop discovered tools after the transport disconnected. Returns the
    /// registered names the caller must unregister. During an in-flight
    /// attempt the disconnect is only recorded; [`Self::mark_ready`] then
    /// refuses the attempt's result.
    pub(crate) fn reset_after_disconnect(&self, reason: &DisconnectReason) -> Vec<String> {
        let mut state = self.lock();
        if state.closed {
            return Vec::new();
        }
        tracing::warn!(server = %self.name, %reason, "MCP server disconnected");
        if state.in_flight.is_some() {
            state.interrupted = Some(reason.to_string());
            return Vec::new();
        }
        state.status = SessionStatus::Uninitialized;
        state.tools.clear();
        std::mem::take(&mut state.registered)
    }

    /// Close the session for good. Returns the in-flight attempt, if any,
    /// and the registered names the caller must unregister.
    pub(crate) fn close(&self) -> (Option<InitHandle>, Vec<String>) {
        let mut state = self.lock();
        state.closed = true;
        state.status = SessionStatus::Failed(CLOSED_MESSAGE.to_string());
        state.tools.clear();
        (
            state.in_flight.take(),
            std::mem::take(&mut state.registered),
        )
    }

    /// Whether [`Self::close`] has run.
    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Convert a shared outcome into this crate's error type.
    pub(crate) fn outcome(&self, outcome: InitOutcome) -> Result<Vec<String>> {
        outcome.map_err(|message| {
            McpError::InitializationFailed {
                server: self.name.clone(),
                message,
            }
            .into()
        })
    }
}
