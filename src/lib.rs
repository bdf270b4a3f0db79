//! xzatoma-mcp - MCP tool server adapter library
//!
//! This library connects an agent to external Model Context Protocol
//! servers and exposes their tools through a generic tool registry.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: wire types, transports (stdio, SSE, HTTP), protocol, and the
//!   lazily-initializing adapter
//! - `tools`: the host-facing tool registry and executor trait
//! - `config`: configuration loading and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: the command-line surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xzatoma_mcp::{Config, McpAdapter, ToolRegistry, TrustPolicy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let registry = Arc::new(ToolRegistry::new());
//!     let adapter = McpAdapter::new(
//!         &config.mcp,
//!         registry.clone(),
//!         &TrustPolicy::from_config(&config.mcp),
//!     )?;
//!     adapter.before_turn().await;
//!     println!("{:?}", registry.names());
//!     adapter.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{McpError, Result};
pub use mcp::{McpAdapter, PolicyGate, TrustPolicy};
pub use tools::{ToolExecutor, ToolRegistry, ToolResult};
