//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every MCP transport
//! satisfies. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout pipes.
//! - [`sse::SseTransport`] -- long-lived server-sent-event stream for
//!   responses, POSTs to a discovered endpoint for requests.
//! - [`http::HttpTransport`] -- one HTTP POST per request.
//! - [`fake::FakeTransport`] -- scripted in-process transport (cfg(test)
//!   only).
//!
//! # Design
//!
//! A transport owns its connection lifecycle, its [`PendingTable`], and
//! its liveness policy. Callers hand it a typed request and a deadline and
//! get back the response with the same id. Disconnects are reported once
//! per event to every registered callback through a [`DisconnectNotifier`].
//!
//! [`PendingTable`]: crate::mcp::pending::PendingTable

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub mod http;
pub mod sse;
pub mod stdio;

#[cfg(test)]
pub mod fake;

/// Number of consecutive timeouts (stdio) or failed sends (HTTP) that trip
/// the liveness policy.
pub const LIVENESS_THRESHOLD: u32 = 3;

/// Why a transport reported a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The child process exited on its own
    ProcessExited {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
    },
    /// The stdio liveness policy force-terminated the child
    ConsecutiveTimeouts {
        /// Timeouts observed in a row
        count: u32,
    },
    /// The SSE stream ended
    StreamClosed(String),
    /// The HTTP liveness policy gave up on the server
    ConsecutiveFailures {
        /// Failed sends observed in a row
        count: u32,
    },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ProcessExited { code: Some(code) } => {
                write!(f, "process exited with code {}", code)
            }
            DisconnectReason::ProcessExited { code: None } => {
                write!(f, "process terminated by signal")
            }
            DisconnectReason::ConsecutiveTimeouts { count } => {
                write!(f, "{} consecutive request timeouts", count)
            }
            DisconnectReason::StreamClosed(detail) => write!(f, "event stream closed: {}", detail),
            DisconnectReason::ConsecutiveFailures { count } => {
                write!(f, "{} consecutive failed requests", count)
            }
        }
    }
}

/// Callback invoked when a transport disconnects.
pub type DisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Fans a disconnect event out to registered callbacks, at most once per
/// connection.
///
/// The latch is re-armed by [`DisconnectNotifier::arm`] when the transport
/// (re)starts, so a second disconnect after a manual restart is reported
/// again.
#[derive(Default)]
pub struct DisconnectNotifier {
    callbacks: Mutex<Vec<DisconnectCallback>>,
    fired: AtomicBool,
}

impl fmt::Debug for DisconnectNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callbacks = self.callbacks.lock().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("DisconnectNotifier")
            .field("callbacks", &callbacks)
            .field("fired", &self.fired.load(Ordering::SeqCst))
            .finish()
    }
}

impl DisconnectNotifier {
    /// Create a notifier with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every future disconnect event.
    pub fn register(&self, callback: DisconnectCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    /// Re-arm the latch for a fresh connection.
    pub fn arm(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }

    /// Invoke every callback with `reason` unless this connection has
    /// already reported a disconnect. Returns whether callbacks ran.
    pub fn fire(&self, reason: DisconnectReason) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            callback(reason.clone());
        }
        true
    }
}

/// Contract shared by every MCP transport.
///
/// All methods are safe to call concurrently from multiple callers, as long
/// as each in-flight request uses a distinct id.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use xzatoma_mcp::mcp::transport::{stdio::StdioTransport, Transport};
/// use xzatoma_mcp::mcp::types::JsonRpcRequest;
/// use xzatoma_mcp::mcp::config::StdioTransportConfig;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::new(
///     StdioTransportConfig {
///         command: "my-mcp-server".into(),
///         args: vec![],
///         env: Default::default(),
///         cwd: None,
///     },
///     Duration::from_secs(2),
/// );
/// transport.start().await?;
/// let resp = transport
///     .send(JsonRpcRequest::new(1u64, "tools/list", serde_json::json!({})), Duration::from_secs(5))
///     .await?;
/// assert_eq!(resp.id, Some(1u64.into()));
/// transport.stop().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Establish the connection. Resolves once the transport is ready, or
    /// fails with a connection error carrying enough detail to diagnose.
    /// Calling `start` on a connected transport is a no-op.
    async fn start(&self) -> Result<()>;

    /// Send `request` and wait up to `timeout` for the response with the
    /// same id.
    ///
    /// # Errors
    ///
    /// - `McpError::Timeout` when the deadline passes
    /// - `McpError::ConnectionLost` / `McpError::Stopped` when the
    ///   transport goes away while the request is pending
    /// - `McpError::NotConnected` when the transport is not started or has
    ///   been marked disconnected
    /// - `McpError::Connection` when the request could not be delivered
    async fn send(&self, request: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse>;

    /// Fire-and-forget a notification. No pending entry is created.
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Tear down the connection and settle every pending request with a
    /// "stopped" failure. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Register a callback invoked once per disconnect event.
    fn on_disconnect(&self, callback: DisconnectCallback);

    /// Current liveness.
    fn is_connected(&self) -> bool;
}
