//! Command-line integration tests for the `xzatoma-mcp` binary
//!
//! `list` never touches the network; `init` and `call` are exercised
//! against the stdio test server.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use common::test_server_exe;

fn config_with_test_server(dir: &TempDir, trusted: bool) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    let yaml = format!(
        "mcp:\n  servers:\n    local:\n      command: {:?}\n      trusted: {}\n    remote:\n      kind: http\n      url: http://127.0.0.1:9/mcp\n",
        test_server_exe().to_string_lossy(),
        trusted
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_list_shows_servers_and_policy() {
    let dir = TempDir::new().unwrap();
    let config = config_with_test_server(&dir, true);

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config").arg(&config).arg("list");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("local"))
        .stdout(predicate::str::contains("stdio"))
        .stdout(predicate::str::contains("remote"))
        .stdout(predicate::str::contains("http://127.0.0.1:9/mcp"))
        .stdout(predicate::str::contains("denied"));
}

#[test]
fn test_list_with_no_servers() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("empty.yaml");
    std::fs::write(&config, "mcp: {}\n").unwrap();

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config").arg(&config).arg("list");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No MCP servers configured"));
}

#[test]
fn test_list_fails_when_a_transport_cannot_be_built() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad-header.yaml");
    std::fs::write(
        &config,
        "mcp:\n  servers:\n    remote:\n      kind: http\n      url: http://127.0.0.1:9/mcp\n      headers: { \"bad header\": v }\n      trusted: true\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config").arg(&config).arg("list");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("bad header"));
}

#[test]
fn test_init_prints_registered_tools() {
    let dir = TempDir::new().unwrap();
    let config = config_with_test_server(&dir, true);

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config").arg(&config).arg("init").arg("local");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("local__echo"))
        .stdout(predicate::str::contains("local__describe"));
}

#[test]
fn test_init_unknown_server_fails() {
    let dir = TempDir::new().unwrap();
    let config = config_with_test_server(&dir, true);

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config").arg(&config).arg("init").arg("nope");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_init_untrusted_server_is_denied() {
    let dir = TempDir::new().unwrap();
    let config = config_with_test_server(&dir, false);

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config").arg(&config).arg("init").arg("local");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("policy"));
}

#[test]
fn test_call_echo_as_json() {
    let dir = TempDir::new().unwrap();
    let config = config_with_test_server(&dir, true);

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("call")
        .arg("local__echo")
        .arg("--args")
        .arg(r#"{"message":"from the cli"}"#)
        .arg("--json");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("from the cli"))
        .stdout(predicate::str::contains("\"isError\": false"));
}

#[test]
fn test_call_with_invalid_args_fails() {
    let dir = TempDir::new().unwrap();
    let config = config_with_test_server(&dir, true);

    let mut cmd = Command::cargo_bin("xzatoma-mcp").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("call")
        .arg("local__echo")
        .arg("--args")
        .arg("{not json");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--args is not valid JSON"));
}
