//! Error types for xzatoma-mcp
//!
//! This module defines all error types used by the MCP adapter, using
//! `thiserror` for ergonomic error handling. Fallible functions return
//! [`Result`], an `anyhow` alias; callers that need to branch on the kind
//! of failure use `err.downcast_ref::<McpError>()`.

use thiserror::Error;

/// Main error type for MCP adapter operations
///
/// The transport-facing variants are deliberately distinct: a
/// [`McpError::Timeout`] feeds liveness counters, a
/// [`McpError::Connection`] means a transport could not be reached at all,
/// and [`McpError::ConnectionLost`] means it went away while a request was
/// still pending.
#[derive(Error, Debug)]
pub enum McpError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transport could not be established or reached (spawn failure,
    /// connection refused, non-2xx handshake)
    #[error("MCP connection error: {0}")]
    Connection(String),

    /// A request's deadline expired before a response arrived
    #[error("MCP timeout: `{method}` (id {id}) got no response within {timeout_ms}ms")]
    Timeout {
        /// Method of the request that timed out
        method: String,
        /// Id of the request that timed out
        id: String,
        /// The deadline that was applied, in milliseconds
        timeout_ms: u64,
    },

    /// The transport disconnected while the request was pending
    #[error("MCP connection lost: {0}")]
    ConnectionLost(String),

    /// The transport was stopped while the request was pending
    #[error("MCP transport stopped before a response arrived")]
    Stopped,

    /// The transport is not started, or has been marked disconnected
    #[error("MCP transport not connected: {0}")]
    NotConnected(String),

    /// A well-formed JSON-RPC error object returned by the server
    #[error("MCP remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Server-supplied error message
        message: String,
    },

    /// Malformed or unexpected protocol payloads
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// A request id that is already in flight on the same transport
    #[error("Duplicate request id in flight: {0}")]
    DuplicateRequestId(String),

    /// No configured server with this name
    #[error("Unknown MCP server: {0}")]
    UnknownServer(String),

    /// The server exists but the policy gate refused it
    #[error("MCP server `{0}` is not permitted by policy")]
    PolicyDenied(String),

    /// No registered tool with this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The shared initialization attempt for a server failed
    #[error("MCP server `{server}` failed to initialize: {message}")]
    InitializationFailed {
        /// Server name
        server: String,
        /// Rendered cause, identical for every awaiting trigger
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl McpError {
    /// Returns true for errors that count as a timeout for liveness purposes.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}

/// Result type alias for xzatoma-mcp operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns the [`McpError`] carried by an `anyhow::Error`, if any.
pub fn mcp_error(err: &anyhow::Error) -> Option<&McpError> {
    err.downcast_ref::<McpError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = McpError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_timeout_error_display() {
        let error = McpError::Timeout {
            method: "tools/list".to_string(),
            id: "7".to_string(),
            timeout_ms: 250,
        };
        let s = error.to_string();
        assert!(s.contains("tools/list"));
        assert!(s.contains("id 7"));
        assert!(s.contains("250ms"));
        assert!(error.is_timeout());
    }

    #[test]
    fn test_connection_lost_mentions_connection_lost() {
        let error = McpError::ConnectionLost("SSE stream closed".to_string());
        assert!(error.to_string().contains("connection lost"));
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_remote_error_display() {
        let error = McpError::Remote {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "MCP remote error -32601: Method not found"
        );
    }

    #[test]
    fn test_initialization_failed_display() {
        let error = McpError::InitializationFailed {
            server: "files".to_string(),
            message: "spawn failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "MCP server `files` failed to initialize: spawn failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: McpError = io_error.into();
        assert!(matches!(error, McpError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: McpError = json_error.into();
        assert!(matches!(error, McpError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: McpError = yaml_error.into();
        assert!(matches!(error, McpError::Yaml(_)));
    }

    #[test]
    fn test_mcp_error_downcast_through_anyhow() {
        let err: anyhow::Error = McpError::Stopped.into();
        assert!(matches!(mcp_error(&err), Some(McpError::Stopped)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<McpError>();
    }
}
