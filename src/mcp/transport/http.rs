//! Plain HTTP transport for MCP
//!
//! This module implements [`HttpTransport`]: every request is one HTTP
//! POST to the configured URL. The server may reply with:
//!
//! - `application/json` -- a direct JSON-RPC response body
//! - `text/event-stream` -- an SSE body carrying one or more JSON-RPC
//!   messages; the one whose id matches resolves the request
//! - `202 Accepted` -- an empty acknowledgement (notifications)
//!
//! # Session management
//!
//! When a response carries an `Mcp-Session-Id` header the value is stored
//! and replayed on every later POST. A `404` while a session is active
//! clears it. `stop` issues a best-effort `DELETE` to end the session.
//!
//! # Liveness
//!
//! Connection errors and non-2xx statuses are retried a fixed number of
//! times with a fixed delay. Only the final outcome of a `send` counts:
//! a failure bumps the consecutive-failure counter and a success resets
//! it. At [`LIVENESS_THRESHOLD`] the transport marks itself disconnected
//! and fires its disconnect callbacks once. There is no socket to lose, so
//! this is a policy decision; `start` re-arms the transport.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{McpError, Result};
use crate::mcp::config::{HttpSettings, RemoteTransportConfig};
use crate::mcp::pending::{PendingTable, SettleFailure};
use crate::mcp::transport::sse::{dispatch_post_response, header_map};
use crate::mcp::transport::{
    DisconnectCallback, DisconnectNotifier, DisconnectReason, Transport, LIVENESS_THRESHOLD,
};
use crate::mcp::types::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION,
};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// HTTP POST-per-request MCP transport.
///
/// # Examples
///
/// ```no_run
/// use url::Url;
/// use xzatoma_mcp::mcp::config::{HttpSettings, RemoteTransportConfig};
/// use xzatoma_mcp::mcp::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     RemoteTransportConfig {
///         url: Url::parse("http://localhost:3000/mcp").unwrap(),
///         headers: Default::default(),
///     },
///     &HttpSettings::default(),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
    pending: PendingTable,
    notifier: DisconnectNotifier,
    connected: AtomicBool,
    consecutive_failures: AtomicU32,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Create a transport for `config`. No I/O happens until `send`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] for invalid headers and
    /// [`McpError::Http`] if the HTTP client cannot be built.
    pub fn new(config: RemoteTransportConfig, settings: &HttpSettings) -> Result<Self> {
        let headers = header_map(&config.headers)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(McpError::from)?;
        Ok(Self {
            url: config.url,
            headers,
            client,
            retries: settings.retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            pending: PendingTable::new(),
            notifier: DisconnectNotifier::new(),
            connected: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            session_id: RwLock::new(None),
        })
    }

    /// Current value of the consecutive-failure counter.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// The session id captured from the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post_once(
        &self,
        body: &(impl serde::Serialize + Sync),
    ) -> std::result::Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, LATEST_PROTOCOL_VERSION)
            .json(body);
        if let Some(sid) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, sid);
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("POST to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.write().await.take().is_some() {
            return Err(McpError::Connection(format!(
                "MCP session expired at {} (HTTP 404)",
                self.url
            )));
        }
        if !status.is_success() {
            return Err(McpError::Connection(format!(
                "POST to {} returned HTTP {}",
                self.url, status
            )));
        }

        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(sid) {
                tracing::debug!(session_id = sid, "MCP HTTP session established");
                *current = Some(sid.to_string());
            }
        }
        Ok(response)
    }

    async fn post_with_retries(
        &self,
        body: &(impl serde::Serialize + Sync),
    ) -> std::result::Result<reqwest::Response, McpError> {
        let mut attempt = 0;
        loop {
            match self.post_once(body).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(
                        url = %self.url,
                        attempt,
                        error = %e,
                        "MCP HTTP POST failed; retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_failure(&self, err: &McpError) {
        let count = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(url = %self.url, count, error = %err, "MCP HTTP send failed");
        if count == LIVENESS_THRESHOLD {
            self.connected.store(false, Ordering::SeqCst);
            self.pending.fail_all(SettleFailure::ConnectionLost(format!(
                "{} consecutive failed requests to {}",
                count, self.url
            )));
            if self
                .notifier
                .fire(DisconnectReason::ConsecutiveFailures { count })
            {
                tracing::warn!(url = %self.url, count, "MCP HTTP server marked disconnected");
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn start(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.notifier.arm();
            tracing::info!(url = %self.url, "MCP HTTP transport ready");
        }
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.url.to_string()).into());
        }

        let mut guard = self
            .pending
            .register(request.id.clone(), &request.method, timeout)?;
        tracing::debug!(id = %request.id, method = %request.method, "MCP HTTP request");

        let deliver = async {
            let response = self.post_with_retries(&request).await?;
            dispatch_post_response(response, &self.pending).await
        };

        let outcome = tokio::select! {
            res = guard.wait() => res,
            delivered = deliver => match delivered {
                Err(e) => Err(e),
                Ok(()) => guard.try_settled().unwrap_or_else(|| {
                    Err(McpError::Protocol(format!(
                        "HTTP response from {} carried no reply for request {}",
                        self.url, request.id
                    )))
                }),
            },
        };

        match outcome {
            Ok(response) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(response)
            }
            Err(McpError::Stopped) => Err(McpError::Stopped.into()),
            Err(err) => {
                self.record_failure(&err);
                Err(err.into())
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.url.to_string()).into());
        }
        self.post_with_retries(&notification).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.fail_all(SettleFailure::Stopped);

        if let Some(sid) = self.session_id.write().await.take() {
            let result = self
                .client
                .delete(self.url.clone())
                .headers(self.headers.clone())
                .header(SESSION_HEADER, sid)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(error = %e, "MCP HTTP session DELETE failed");
            }
        }
        Ok(())
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        self.notifier.register(callback);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
