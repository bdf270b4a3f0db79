//! MCP (Model Context Protocol) client adapter
//!
//! This module connects the agent to external MCP tool servers over three
//! transports and exposes their tools through the host's
//! [`ToolRegistry`](crate::tools::ToolRegistry).
//!
//! The implementation targets protocol revision **2025-11-25** and accepts
//! older revisions the server may negotiate down to.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC envelopes and the MCP payloads used here
//! - `content`   -- mapping of MCP content items to agent content blocks
//! - `pending`   -- the per-transport pending-request table
//! - `transport` -- `Transport` trait and the stdio, SSE, and HTTP transports
//! - `protocol`  -- typed `initialize` / `tools/list` / `tools/call`
//! - `config`    -- the `mcp:` configuration block
//! - `factory`   -- builds a transport from a server's configuration
//! - `policy`    -- which servers may run at all
//! - `session`   -- per-server state and the shared initialization handle
//! - `adapter`   -- lazy, deduplicated initialization and tool registration

pub mod adapter;
pub mod config;
pub mod content;
pub mod factory;
pub mod pending;
pub mod policy;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use adapter::{McpAdapter, McpToolExecutor, ServerStatus};
pub use config::{McpConfig, ServerConfig, TransportConfig};
pub use policy::{AllowAll, PolicyGate, TrustPolicy};
pub use session::{ServerSession, SessionStatus};
pub use transport::Transport;
