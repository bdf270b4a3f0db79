//! Adapter integration tests over a real stdio server
//!
//! Drives `McpAdapter` against the `mcp_test_server` subprocess. The
//! server's `--log` file records every method it receives, which lets the
//! tests count handshakes across concurrent triggers and reconnects.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::test_server_exe;
use xzatoma_mcp::mcp::config::{McpConfig, ServerConfig};
use xzatoma_mcp::mcp::types::JsonRpcRequest;
use xzatoma_mcp::mcp::{SessionStatus, TrustPolicy};
use xzatoma_mcp::{McpAdapter, McpError, ToolRegistry};

fn logged_server(log: &Path) -> ServerConfig {
    ServerConfig::stdio(
        test_server_exe().to_string_lossy().to_string(),
        vec!["--log".to_string(), log.to_string_lossy().to_string()],
    )
    .trusted(true)
}

fn count(log: &Path, method: &str) -> usize {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .filter(|l| *l == method)
        .count()
}

fn adapter_with(servers: Vec<(&str, ServerConfig)>) -> (McpAdapter, Arc<ToolRegistry>) {
    let mut config = McpConfig::default();
    for (name, server) in servers {
        config.servers.insert(name.to_string(), server);
    }
    let registry = Arc::new(ToolRegistry::new());
    let adapter =
        McpAdapter::new(&config, registry.clone(), &TrustPolicy::from_config(&config)).unwrap();
    (adapter, registry)
}

#[tokio::test]
async fn test_before_turn_and_trigger_share_one_handshake() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("methods.log");
    let (adapter, registry) = adapter_with(vec![("local", logged_server(&log))]);

    let (turn, triggered) = tokio::join!(adapter.before_turn(), adapter.trigger("local"));

    let from_turn = turn.get("local").unwrap().as_ref().unwrap().clone();
    let from_trigger = triggered.unwrap();
    assert_eq!(from_turn, from_trigger);
    assert_eq!(count(&log, "initialize"), 1);
    assert_eq!(count(&log, "notifications/initialized"), 1);
    assert_eq!(count(&log, "tools/list"), 1);
    assert_eq!(
        registry.names(),
        vec!["local__describe", "local__echo", "local__fail"]
    );

    adapter.trigger("local").await.unwrap();
    assert_eq!(count(&log, "initialize"), 1);

    adapter.shutdown().await;
}

#[tokio::test]
async fn test_call_tool_round_trip() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("methods.log");
    let (adapter, _registry) = adapter_with(vec![("local", logged_server(&log))]);
    adapter.before_turn().await;

    let result = adapter
        .call_tool("local__echo", json!({"message": "through the adapter"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.to_message(), "through the adapter");
    assert_eq!(result.metadata.get("server").map(String::as_str), Some("local"));

    let failed = adapter.call_tool("local__fail", json!({})).await.unwrap();
    assert!(failed.is_error);
    assert_eq!(failed.to_message(), "Error: tool failed");

    let err = adapter
        .call_tool("local__missing", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpError>(),
        Some(McpError::UnknownTool(_))
    ));

    adapter.shutdown().await;
}

#[tokio::test]
async fn test_untrusted_server_is_never_spawned() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("untrusted.log");
    let server = logged_server(&log).trusted(false);
    let (adapter, registry) = adapter_with(vec![("shady", server)]);

    let results = adapter.before_turn().await;
    assert!(results.is_empty());
    let err = adapter.trigger("shady").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpError>(),
        Some(McpError::PolicyDenied(_))
    ));

    assert!(registry.is_empty());
    assert!(!log.exists());
    let statuses = adapter.statuses();
    assert_eq!(statuses.len(), 1);
    assert!(!statuses[0].permitted);
}

#[tokio::test]
async fn test_crash_unregisters_tools_and_next_trigger_reinitializes() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("methods.log");
    let (adapter, registry) = adapter_with(vec![("local", logged_server(&log))]);
    adapter.trigger("local").await.unwrap();
    assert_eq!(registry.len(), 3);

    let session = adapter.session("local").unwrap().clone();
    let _ = session
        .transport()
        .send(
            JsonRpcRequest::new(999u64, "test/crash", json!({})),
            Duration::from_secs(5),
        )
        .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registry.is_empty());
    assert_eq!(session.status(), SessionStatus::Uninitialized);

    adapter.trigger("local").await.unwrap();
    assert_eq!(count(&log, "initialize"), 2);
    assert_eq!(registry.len(), 3);

    adapter.shutdown().await;
}

#[tokio::test]
async fn test_one_failing_server_does_not_block_another() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("methods.log");
    let broken = ServerConfig::stdio("/nonexistent/mcp-server", vec![]).trusted(true);
    let (adapter, registry) = adapter_with(vec![
        ("broken", broken),
        ("local", logged_server(&log)),
    ]);

    let results = adapter.before_turn().await;
    assert!(results["broken"].is_err());
    assert!(results["local"].is_ok());
    assert!(matches!(
        adapter.session("broken").unwrap().status(),
        SessionStatus::Failed(_)
    ));
    assert_eq!(registry.len(), 3);

    adapter.shutdown().await;
}
