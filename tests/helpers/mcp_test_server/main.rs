//! MCP test server binary for integration tests
//!
//! This binary implements a minimal MCP server that communicates over
//! stdin/stdout using newline-delimited JSON. It is used by integration
//! tests to exercise the stdio transport and the adapter against a real
//! child process.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol version `2025-11-25`, `tools` capability.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- `echo`, `fail`, and `describe`.
//! - `tools/call`:
//!   - `echo` returns `arguments.message` as text
//!   - `fail` returns `isError: true`
//!   - `describe` returns one item of every content type
//! - `ping` -- empty result.
//! - `test/slow` -- replies `{"tag": ..}` after `params.delay_ms`, from a
//!   separate thread, so later requests can overtake it.
//! - `test/hang` -- never replies.
//! - `test/crash` -- exits with status 3.
//! - anything else -- `-32601 Method not found`.
//!
//! # Options
//!
//! - `--log <path>` appends every received method name, one per line, so
//!   tests can count handshakes.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

type Output = Arc<Mutex<io::Stdout>>;

fn main() {
    let log_path = parse_log_path();
    let out: Output = Arc::new(Mutex::new(io::stdout()));
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                send(
                    &out,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": { "code": -32700, "message": "Parse error" }
                    }),
                );
                continue;
            }
        };

        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        if let Some(path) = &log_path {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(file, "{}", method);
            }
        }

        match method.as_str() {
            "notifications/initialized" => continue,
            "test/hang" => continue,
            "test/crash" => std::process::exit(3),
            "test/slow" => {
                let out = out.clone();
                std::thread::spawn(move || {
                    let delay = params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
                    std::thread::sleep(Duration::from_millis(delay));
                    let tag = params.get("tag").cloned().unwrap_or(Value::Null);
                    send(&out, &ok(&id, json!({ "tag": tag })));
                });
                continue;
            }
            _ => {}
        }

        let response = match method.as_str() {
            "initialize" => ok(
                &id,
                json!({
                    "protocolVersion": "2025-11-25",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mcp-test-server", "version": "0.2.0" }
                }),
            ),
            "tools/list" => ok(&id, tools_list()),
            "tools/call" => tools_call(&id, &params),
            "ping" => ok(&id, json!({})),
            other => error(&id, -32601, &format!("Method not found: {}", other)),
        };
        send(&out, &response);
    }
}

fn parse_log_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--log" {
            return args.next();
        }
    }
    None
}

fn send(out: &Output, message: &Value) {
    let Ok(serialized) = serde_json::to_string(message) else {
        eprintln!("mcp_test_server: failed to serialize response");
        return;
    };
    let Ok(mut out) = out.lock() else { return };
    if writeln!(out, "{}", serialized).is_err() || out.flush().is_err() {
        std::process::exit(0);
    }
}

fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echoes input",
                "inputSchema": {
                    "type": "object",
                    "properties": { "message": { "type": "string" } }
                }
            },
            {
                "name": "fail",
                "description": "Always reports failure",
                "inputSchema": { "type": "object" }
            },
            {
                "name": "describe",
                "description": "Returns every content type",
                "inputSchema": { "type": "object" }
            }
        ]
    })
}

fn tools_call(id: &Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    match name {
        "echo" => {
            let message = params
                .get("arguments")
                .and_then(|a| a.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("");
            ok(
                id,
                json!({ "content": [{ "type": "text", "text": message }], "isError": false }),
            )
        }
        "fail" => ok(
            id,
            json!({ "content": [{ "type": "text", "text": "tool failed" }], "isError": true }),
        ),
        "describe" => ok(
            id,
            json!({
                "content": [
                    { "type": "text", "text": "plain" },
                    { "type": "image", "data": "iVBORw0KGgo=", "mimeType": "image/png" },
                    {
                        "type": "resource",
                        "resource": { "uri": "file:///tmp/a.txt", "mimeType": "text/plain", "text": "hello" }
                    },
                    { "type": "resource_link", "uri": "file:///tmp/b.txt", "name": "b.txt" },
                    { "type": "audio", "data": "AAAA", "mimeType": "audio/wav" }
                ]
            }),
        ),
        other => error(id, -32602, &format!("Unknown tool: {}", other)),
    }
}

fn ok(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
