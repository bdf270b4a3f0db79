//! In-process scripted transport for MCP unit tests
//!
//! [`FakeTransport`] answers `initialize`, `tools/list`, and `tools/call`
//! from memory and counts every method it sees, so tests can assert how
//! many handshakes actually reached the "server". An optional delay keeps
//! requests in flight long enough for concurrent triggers to overlap.
//!
//! Built-in tool behavior for `tools/call`:
//!
//! - `fail` -- returns a result with `isError: true`
//! - `boom` -- returns a JSON-RPC error object
//! - anything else that is listed -- echoes its arguments as text
//!
//! # Example
//!
//! ```ignore
//! let fake = Arc::new(FakeTransport::with_tools(&["echo"]));
//! fake.start().await?;
//! let resp = fake.send(JsonRpcRequest::new(1u64, "tools/list", json!({})), timeout).await?;
//! assert_eq!(fake.calls("tools/list"), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{McpError, Result};
use crate::mcp::transport::{DisconnectCallback, DisconnectNotifier, DisconnectReason, Transport};
use crate::mcp::types::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// Scripted in-memory transport.
#[derive(Debug)]
pub struct FakeTransport {
    tools: Vec<String>,
    page_size: Option<usize>,
    protocol_version: String,
    delay: Duration,
    initialize_error: Option<String>,
    fail_start: AtomicBool,
    calls: Mutex<HashMap<String, usize>>,
    starts: AtomicUsize,
    connected: AtomicBool,
    notifier: DisconnectNotifier,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    /// A fake server with no tools.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            page_size: None,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            delay: Duration::ZERO,
            initialize_error: None,
            fail_start: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
            starts: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            notifier: DisconnectNotifier::new(),
        }
    }

    /// A fake server advertising `tools`.
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..Self::new()
        }
    }

    /// Paginate `tools/list` in pages of `n`.
    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = Some(n);
        self
    }

    /// Answer `initialize` with this protocol version.
    pub fn with_protocol_version(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer `initialize` with a JSON-RPC error.
    pub fn failing_initialize(mut self, message: &str) -> Self {
        self.initialize_error = Some(message.to_string());
        self
    }

    /// Make `start` fail until cleared.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// How many times `method` was sent or notified.
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(method).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// How many times `start` succeeded.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Simulate the server going away.
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.connected.store(false, Ordering::SeqCst);
        self.notifier.fire(reason);
    }

    fn record(&self, method: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(method.to_string()).or_insert(0) += 1;
        }
    }

    fn list_page(&self, params: &Value) -> Value {
        let start = params
            .get("cursor")
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let end = match self.page_size {
            Some(n) => (start + n).min(self.tools.len()),
            None => self.tools.len(),
        };
        let tools: Vec<Value> = self.tools[start.min(end)..end]
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("fake tool {}", name),
                    "inputSchema": {"type": "object"}
                })
            })
            .collect();
        if end < self.tools.len() {
            json!({ "tools": tools, "nextCursor": end.to_string() })
        } else {
            json!({ "tools": tools })
        }
    }

    fn answer(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let params = request.params.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            METHOD_INITIALIZE => match &self.initialize_error {
                Some(message) => JsonRpcResponse::failure(id, -32603, message.clone()),
                None => JsonRpcResponse::success(
                    id,
                    json!({
                        "protocolVersion": self.protocol_version,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0.0.0"}
                    }),
                ),
            },
            METHOD_TOOLS_LIST => JsonRpcResponse::success(id, self.list_page(&params)),
            METHOD_TOOLS_CALL => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                let args = params.get("arguments").cloned().unwrap_or(json!({}));
                match name {
                    "boom" => JsonRpcResponse::failure(id, -32000, "tool exploded"),
                    "fail" => JsonRpcResponse::success(
                        id,
                        json!({"content": [{"type": "text", "text": "it failed"}], "isError": true}),
                    ),
                    n if self.tools.iter().any(|t| t == n) => JsonRpcResponse::success(
                        id,
                        json!({"content": [{"type": "text", "text": args.to_string()}]}),
                    ),
                    n => JsonRpcResponse::failure(id, -32602, format!("unknown tool: {}", n)),
                }
            }
            other => JsonRpcResponse::failure(id, -32601, format!("Method not found: {}", other)),
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(McpError::Connection("fake server unreachable".into()).into());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.notifier.arm();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest, _timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::NotConnected("fake".into()).into());
        }
        self.record(&request.method);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.answer(&request))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::NotConnected("fake".into()).into());
        }
        self.record(&notification.method);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        self.notifier.register(callback);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
