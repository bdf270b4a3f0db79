//! Shared helpers for integration tests
//!
//! - [`test_server_exe`] locates the `mcp_test_server` helper binary.
//! - [`SseTestServer`] is an in-process MCP server speaking the SSE
//!   transport: `GET /sse` opens a stream whose first event announces
//!   `/messages?sessionId=N`, and `POST /messages` answers either on that
//!   stream (202 + `message` event) or directly in the POST body.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Returns the path to the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` when building integration
/// tests in the same package.
pub fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

/// Where `POST /messages` puts its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// `202 Accepted`, reply as a `message` event on the stream
    Stream,
    /// `200 OK` with the JSON-RPC response as the body
    Direct,
}

#[derive(Debug)]
struct ServerState {
    mode: ReplyMode,
    sessions: Mutex<HashMap<u64, mpsc::UnboundedSender<Event>>>,
    next_session: AtomicU64,
    calls: Mutex<HashMap<String, usize>>,
    streams_opened: AtomicUsize,
    shutdown: CancellationToken,
}

impl ServerState {
    fn record(&self, method: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(method.to_string()).or_insert(0) += 1;
        }
    }

    fn push(&self, session: u64, message: &Value) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(tx) = sessions.get(&session) {
            let _ = tx.send(Event::default().event("message").data(message.to_string()));
        }
    }
}

/// Running in-process SSE MCP server.
pub struct SseTestServer {
    /// Bound address
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    task: tokio::task::JoinHandle<()>,
}

impl SseTestServer {
    /// Start a server on an ephemeral port.
    pub async fn start(mode: ReplyMode) -> Self {
        let state = Arc::new(ServerState {
            mode,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
            streams_opened: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        });

        let app = Router::new()
            .route("/sse", get(open_stream))
            .route("/messages", post(post_message))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = state.shutdown.clone();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        Self { addr, state, task }
    }

    /// URL of the event stream.
    pub fn sse_url(&self) -> Url {
        Url::parse(&format!("http://{}/sse", self.addr)).unwrap()
    }

    /// URL with no route behind it.
    pub fn missing_url(&self) -> Url {
        Url::parse(&format!("http://{}/missing", self.addr)).unwrap()
    }

    /// How many times `method` was posted.
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// How many event streams have been opened.
    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    /// Close every open stream and stop accepting connections.
    pub async fn stop(self) {
        self.state.shutdown.cancel();
        self.state.sessions.lock().unwrap().clear();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

async fn open_stream(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let session = state.next_session.fetch_add(1, Ordering::SeqCst);
    state.streams_opened.fetch_add(1, Ordering::SeqCst);

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(
        Event::default()
            .event("endpoint")
            .data(format!("/messages?sessionId={}", session)),
    );
    state.sessions.lock().unwrap().insert(session, tx);

    let stream = UnboundedReceiverStream::new(rx)
        .map(Ok)
        .take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn post_message(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(session) = query.get("sessionId").and_then(|s| s.parse::<u64>().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };
    let method = body
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    state.record(&method);

    let Some(id) = body.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    let params = body.get("params").cloned().unwrap_or(Value::Null);

    let delay = match method.as_str() {
        "test/hang" => return StatusCode::ACCEPTED.into_response(),
        "test/slow" => params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    };
    let reply = answer(&id, &method, &params);

    match state.mode {
        ReplyMode::Direct => {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Json(reply).into_response()
        }
        ReplyMode::Stream => {
            let state = state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                state.push(session, &reply);
            });
            StatusCode::ACCEPTED.into_response()
        }
    }
}

fn answer(id: &Value, method: &str, params: &Value) -> Value {
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "sse-test-server", "version": "0.1.0" }
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "echo",
                "description": "Echoes input",
                "inputSchema": { "type": "object", "properties": { "message": { "type": "string" } } }
            }]
        }),
        "tools/call" => {
            let message = params
                .get("arguments")
                .and_then(|a| a.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("");
            json!({ "content": [{ "type": "text", "text": message }] })
        }
        "test/slow" => json!({ "tag": params.get("tag").cloned().unwrap_or(Value::Null) }),
        "ping" => json!({}),
        other => {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {}", other) }
            })
        }
    };
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}
