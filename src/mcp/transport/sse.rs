//! Server-sent-event transport for MCP
//!
//! This module implements [`SseTransport`]:
//!
//! - `start` opens a long-lived GET with `Accept: text/event-stream` and
//!   waits for the server's `endpoint` event, whose data (absolute or
//!   relative to the stream URL) is where requests are POSTed.
//! - `send` POSTs the request to that endpoint. The server may answer in
//!   the POST body (JSON or an event-stream body) or acknowledge with an
//!   empty body and deliver the response later as a `message` event on the
//!   open stream. Both paths resolve the same pending entry by id.
//! - When the stream ends, every pending request fails with a "connection
//!   lost" error, the transport is marked disconnected, and disconnect
//!   callbacks fire once. `stop` followed by `start` is the reconnect path.
//!
//! The [`SseDecoder`] frame parser and [`dispatch_post_response`] are shared
//! with the HTTP transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{McpError, Result};
use crate::mcp::config::RemoteTransportConfig;
use crate::mcp::pending::{PendingTable, SettleFailure};
use crate::mcp::transport::{DisconnectCallback, DisconnectNotifier, DisconnectReason, Transport};
use crate::mcp::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ---------------------------------------------------------------------------
// SSE frame parser
// ---------------------------------------------------------------------------

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` type
    pub event: Option<String>,
    /// `id:` field
    pub id: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// Event type with the SSE default applied.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a blank line (`\n\n`, `\r` stripped) closes an
/// event, so multi-byte UTF-8 sequences split across chunks are safe.
/// Comment lines, `retry:` fields, empty events, and `ping` events are
/// dropped.
///
/// # Examples
///
/// ```
/// use xzatoma_mcp::mcp::transport::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.push(b"event: endpoint\nda").is_empty());
/// let events = decoder.push(b"ta: /messages?sessionId=1\n\n");
/// assert_eq!(events[0].kind(), "endpoint");
/// assert_eq!(events[0].data, "/messages?sessionId=1");
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&rest))
    }
}

fn field_value(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = None;
    let mut id = None;

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(field_value(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event = Some(field_value(value).trim().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(field_value(value).trim().to_string());
        }
        // `:` comments, `retry:`, and unknown fields are ignored.
    }

    if event
        .as_deref()
        .map(|e| e.eq_ignore_ascii_case("ping"))
        .unwrap_or(false)
    {
        return None;
    }
    let data = data_lines.join("\n");
    if data.trim().is_empty() || data.eq_ignore_ascii_case("[ping]") {
        return None;
    }
    Some(SseEvent { event, id, data })
}

/// Route one `message` payload: responses resolve their pending entry,
/// everything else is logged and dropped.
pub(crate) fn dispatch_message(data: &str, pending: &PendingTable) {
    match JsonRpcMessage::parse(data) {
        Ok(JsonRpcMessage::Response(response)) => {
            pending.resolve(response);
        }
        Ok(JsonRpcMessage::Request(r)) => {
            tracing::debug!(method = %r.method, "Ignoring server-initiated request");
        }
        Ok(JsonRpcMessage::Notification(n)) => {
            tracing::debug!(method = %n.method, "MCP server notification ignored");
        }
        Err(e) => tracing::debug!(error = %e, "Ignoring malformed MCP message"),
    }
}

/// Consume the body of a successful POST and resolve any responses it
/// carries.
///
/// `application/json` bodies are parsed whole; `text/event-stream` bodies
/// are decoded event by event; empty bodies (e.g. `202 Accepted`) resolve
/// nothing.
pub(crate) async fn dispatch_post_response(
    response: reqwest::Response,
    pending: &PendingTable,
) -> std::result::Result<(), McpError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("text/event-stream") {
        let mut decoder = SseDecoder::new();
        let stream = response.bytes_stream();
        tokio::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                McpError::Connection(format!("failed to read event-stream body: {}", e))
            })?;
            for event in decoder.push(&chunk) {
                if event.kind() == "message" {
                    dispatch_message(&event.data, pending);
                }
            }
        }
        if let Some(event) = decoder.finish() {
            if event.kind() == "message" {
                dispatch_message(&event.data, pending);
            }
        }
        return Ok(());
    }

    let body = response
        .text()
        .await
        .map_err(|e| McpError::Connection(format!("failed to read response body: {}", e)))?;
    if !body.trim().is_empty() {
        dispatch_message(&body, pending);
    }
    Ok(())
}

/// Build a header map from configured name/value pairs.
pub(crate) fn header_map(
    headers: &std::collections::BTreeMap<String, String>,
) -> std::result::Result<HeaderMap, McpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::Config(format!("invalid header name `{}`: {}", name, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            McpError::Config(format!("invalid value for header `{}`: {}", name.as_str(), e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Shared {
    pending: PendingTable,
    notifier: DisconnectNotifier,
    connected: AtomicBool,
    stopping: AtomicBool,
    generation: AtomicU64,
}

#[derive(Debug)]
struct StreamRun {
    endpoint: Url,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// SSE-based MCP transport.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use xzatoma_mcp::mcp::config::RemoteTransportConfig;
/// use xzatoma_mcp::mcp::transport::{sse::SseTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = SseTransport::new(
///     RemoteTransportConfig {
///         url: Url::parse("http://localhost:3000/sse")?,
///         headers: Default::default(),
///     },
///     Duration::from_secs(10),
/// )?;
/// transport.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SseTransport {
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    endpoint_timeout: Duration,
    shared: Arc<Shared>,
    run: Mutex<Option<StreamRun>>,
}

impl SseTransport {
    /// Create a transport for `config`. No I/O happens until
    /// [`Transport::start`].
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] for invalid header names or values and
    /// [`McpError::Http`] if the HTTP client cannot be built.
    pub fn new(config: RemoteTransportConfig, endpoint_timeout: Duration) -> Result<Self> {
        let headers = header_map(&config.headers)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(McpError::from)?;
        Ok(Self {
            url: config.url,
            headers,
            client,
            endpoint_timeout,
            shared: Arc::new(Shared::default()),
            run: Mutex::new(None),
        })
    }

    /// The POST endpoint announced by the server, once started.
    pub async fn endpoint(&self) -> Option<Url> {
        self.run.lock().await.as_ref().map(|r| r.endpoint.clone())
    }

    fn not_connected(&self) -> McpError {
        McpError::NotConnected(self.url.to_string())
    }

    async fn post(
        &self,
        endpoint: &Url,
        body: &impl serde::Serialize,
    ) -> std::result::Result<reqwest::Response, McpError> {
        let response = self
            .client
            .post(endpoint.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("POST to {} failed: {}", endpoint, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!(
                "POST to {} returned HTTP {}",
                endpoint, status
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(old) = run.take() {
            old.cancel.cancel();
            let _ = old.reader.await;
        }

        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                McpError::Connection(format!(
                    "failed to connect to SSE endpoint {}: {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!(
                "SSE endpoint {} returned HTTP {}",
                self.url, status
            ))
            .into());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with("text/event-stream") {
            return Err(McpError::Connection(format!(
                "SSE endpoint {} returned content type `{}` instead of text/event-stream",
                self.url, content_type
            ))
            .into());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        self.shared.notifier.arm();
        self.shared.connected.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(read_events(
            response.bytes_stream(),
            Arc::clone(&self.shared),
            generation,
            cancel.clone(),
            endpoint_tx,
        ));

        let failure = match tokio::time::timeout(self.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(data)) => match self.url.join(data.trim()) {
                Ok(endpoint) => {
                    tracing::info!(url = %self.url, endpoint = %endpoint, "MCP SSE stream open");
                    *run = Some(StreamRun {
                        endpoint,
                        cancel,
                        reader,
                    });
                    return Ok(());
                }
                Err(e) => format!("invalid endpoint `{}` from {}: {}", data.trim(), self.url, e),
            },
            Ok(Err(_)) => format!("SSE stream {} closed before the endpoint event", self.url),
            Err(_) => format!(
                "no endpoint event from {} within {}ms",
                self.url,
                self.endpoint_timeout.as_millis()
            ),
        };

        self.shared.connected.store(false, Ordering::SeqCst);
        cancel.cancel();
        let _ = reader.await;
        Err(McpError::Connection(failure).into())
    }

    async fn send(&self, request: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(self.not_connected().into());
        }
        let endpoint = self.endpoint().await.ok_or_else(|| self.not_connected())?;

        let mut guard = self
            .shared
            .pending
            .register(request.id.clone(), &request.method, timeout)?;
        tracing::debug!(id = %request.id, method = %request.method, "MCP SSE request");

        let pending = self.shared.pending.clone();
        let deliver = async {
            let response = self.post(&endpoint, &request).await?;
            dispatch_post_response(response, &pending).await
        };

        // The response may arrive in the POST body or on the stream; whichever
        // path resolves the pending entry first wins.
        let early = tokio::select! {
            res = guard.wait() => Some(res),
            delivered = deliver => {
                delivered?;
                None
            }
        };
        let response = match early {
            Some(res) => res?,
            None => guard.wait().await?,
        };
        Ok(response)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if !self.is_connected() {
            return Err(self.not_connected().into());
        }
        let endpoint = self.endpoint().await.ok_or_else(|| self.not_connected())?;
        self.post(&endpoint, &notification).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        let old = self.run.lock().await.take();
        self.shared.pending.fail_all(SettleFailure::Stopped);
        if let Some(old) = old {
            old.cancel.cancel();
            let _ = old.reader.await;
            tracing::info!(url = %self.url, "MCP SSE stream closed");
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

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Ok(run) = self.run.try_lock() {
            if let Some(run) = run.as_ref() {
                run.cancel.cancel();
            }
        }
    }
}

async fn read_events(
    stream: impl Stream<Item = reqwest::Result<Bytes>>,
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    tokio::pin!(stream);

    let reason = loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for event in decoder.push(&bytes) {
                    match event.kind() {
                        "endpoint" => match endpoint_tx.take() {
                            Some(tx) => {
                                let _ = tx.send(event.data);
                            }
                            None => tracing::debug!("Ignoring repeated endpoint event"),
                        },
                        "message" => dispatch_message(&event.data, &shared.pending),
                        other => tracing::debug!(event = other, "Ignoring SSE event"),
                    }
                }
            }
            Some(Err(e)) => break format!("stream error: {}", e),
            None => break "server closed the stream".to_string(),
        }
    };

    // Before the endpoint arrives, `start` owns reporting the failure.
    if endpoint_tx.is_some()
        || shared.generation.load(Ordering::SeqCst) != generation
        || shared.stopping.load(Ordering::SeqCst)
    {
        return;
    }

    shared.connected.store(false, Ordering::SeqCst);
    let failed = shared
        .pending
        .fail_all(SettleFailure::ConnectionLost(format!(
            "SSE stream closed: {}",
            reason
        )));
    if shared
        .notifier
        .fire(DisconnectReason::StreamClosed(reason.clone()))
    {
        tracing::warn!(pending = failed, reason = %reason, "MCP SSE stream closed");
    }
}
