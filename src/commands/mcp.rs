//! MCP subcommand handlers
//!
//! This module implements the binary's commands on top of [`McpAdapter`]:
//! `list` (no I/O), `init` (the manual trigger), `tools` (the pre-turn
//! hook), and `call`.

use std::sync::Arc;

use colored::Colorize;
use prettytable::{row, Table};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{McpError, Result};
use crate::mcp::adapter::{McpAdapter, ServerStatus};
use crate::mcp::policy::TrustPolicy;
use crate::mcp::session::SessionStatus;
use crate::tools::{ToolRegistry, ToolResult};

/// Build an adapter over a fresh registry using the trust policy from
/// `config`.
///
/// # Errors
///
/// Returns an error if a permitted server's transport cannot be built.
pub fn build_adapter(config: &Config) -> Result<McpAdapter> {
    McpAdapter::new(
        &config.mcp,
        Arc::new(ToolRegistry::new()),
        &TrustPolicy::from_config(&config.mcp),
    )
}

/// Print configured servers with their transport and policy verdict.
///
/// Builds transports but never starts them.
///
/// # Errors
///
/// Returns an error if a permitted server's transport cannot be built.
pub fn list_servers(config: &Config) -> Result<()> {
    let statuses = build_adapter(config)?.statuses();

    if statuses.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["Server", "Transport", "Endpoint", "Policy"]);
    for status in &statuses {
        table.add_row(row![
            status.name,
            status.kind,
            status.endpoint,
            policy_label(status)
        ]);
    }

    println!("\nConfigured MCP servers:\n");
    table.printstd();
    println!();
    Ok(())
}

fn policy_label(status: &ServerStatus) -> String {
    if status.permitted {
        "permitted".green().to_string()
    } else {
        "denied".red().to_string()
    }
}

fn status_label(status: &Option<SessionStatus>) -> String {
    match status {
        Some(SessionStatus::Ready) => "ready".green().to_string(),
        Some(SessionStatus::Failed(message)) => format!("{} ({})", "failed".red(), message),
        Some(other) => other.to_string(),
        None => "denied".red().to_string(),
    }
}

/// Manual trigger: initialize `server` and print its registered tools.
///
/// # Errors
///
/// Returns an error if the server is unknown, denied by policy, or fails
/// to initialize.
pub async fn init_server(config: &Config, server: &str) -> Result<()> {
    let adapter = build_adapter(config)?;
    let outcome = adapter.trigger(server).await;
    adapter.shutdown().await;
    let names = outcome?;

    if names.is_empty() {
        println!("{} initialized; it exposes no tools.", server.bold());
    } else {
        println!("{} initialized with {} tool(s):", server.bold(), names.len());
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(())
}

/// Pre-turn hook: initialize every permitted server and print every
/// registered tool. Failed servers are reported as warnings.
///
/// # Errors
///
/// Returns an error only if the adapter cannot be built.
pub async fn list_tools(config: &Config) -> Result<()> {
    let adapter = build_adapter(config)?;
    let outcomes = adapter.before_turn().await;

    for (server, outcome) in &outcomes {
        if let Err(e) = outcome {
            eprintln!("{} {}: {}", "warning:".yellow().bold(), server, e);
        }
    }

    let mut servers = Table::new();
    servers.add_row(row!["Server", "Status", "Tools"]);
    for status in adapter.statuses() {
        servers.add_row(row![
            status.name,
            status_label(&status.status),
            status.tool_count
        ]);
    }
    println!("\nMCP servers:\n");
    servers.printstd();

    let definitions = adapter.registry().all_definitions();
    if definitions.is_empty() {
        println!("\nNo MCP tools registered.");
    } else {
        let mut tools = Table::new();
        tools.add_row(row!["Tool", "Description"]);
        for def in &definitions {
            tools.add_row(row![
                def["name"].as_str().unwrap_or_default(),
                def["description"].as_str().unwrap_or_default()
            ]);
        }
        println!("\nRegistered tools:\n");
        tools.printstd();
    }
    println!();

    adapter.shutdown().await;
    Ok(())
}

/// Run the pre-turn hook, then invoke `tool` with `args` (a JSON object).
///
/// # Errors
///
/// Returns an error if `args` is not valid JSON, the tool is not
/// registered, or the call fails at the transport level. A tool that
/// reports failure is printed, not returned as an error.
pub async fn call_tool(config: &Config, tool: &str, args: &str, json_output: bool) -> Result<()> {
    let args: Value = serde_json::from_str(args)
        .map_err(|e| McpError::Config(format!("--args is not valid JSON: {}", e)))?;

    let adapter = build_adapter(config)?;
    adapter.before_turn().await;
    let outcome = adapter.call_tool(tool, args).await;
    adapter.shutdown().await;
    let result = outcome?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result_json(&result))?);
    } else if result.is_error {
        println!("{}", result.to_message().red());
    } else {
        println!("{}", result.to_message());
    }
    Ok(())
}

fn result_json(result: &ToolResult) -> Value {
    json!({
        "isError": result.is_error,
        "content": result.content,
        "metadata": result.metadata,
    })
}
