//! Transport factory
//!
//! Builds the transport implementation matching a server's
//! [`TransportConfig`] variant. The adapter goes through the
//! [`TransportFactory`] trait so tests can substitute scripted transports.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::mcp::config::{McpConfig, ServerConfig, TransportConfig};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::Transport;

/// Creates a transport for one configured server.
pub trait TransportFactory: Send + Sync {
    /// Build (but do not start) the transport for `server`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed, for example
    /// because a configured header is invalid.
    fn create(&self, name: &str, server: &ServerConfig) -> Result<Arc<dyn Transport>>;
}

/// Factory for the three real transports, using the tunables from
/// [`McpConfig`].
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    config: McpConfig,
}

impl DefaultTransportFactory {
    /// Create a factory from the `mcp:` configuration block.
    pub fn new(config: &McpConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, name: &str, server: &ServerConfig) -> Result<Arc<dyn Transport>> {
        tracing::debug!(
            server = name,
            kind = server.transport.kind(),
            endpoint = %server.transport.endpoint(),
            "Creating MCP transport"
        );
        build_transport(&server.transport, &self.config)
    }
}

/// Build the transport for a single [`TransportConfig`] variant.
///
/// # Errors
///
/// Returns [`crate::error::McpError::Config`] for invalid headers and
/// [`crate::error::McpError::Http`] if an HTTP client cannot be built.
///
/// # Examples
///
/// ```
/// use xzatoma_mcp::mcp::config::{McpConfig, ServerConfig};
/// use xzatoma_mcp::mcp::factory::build_transport;
///
/// let server = ServerConfig::stdio("cat", vec![]);
/// let transport = build_transport(&server.transport, &McpConfig::default()).unwrap();
/// assert!(!transport.is_connected());
/// ```
pub fn build_transport(
    transport: &TransportConfig,
    config: &McpConfig,
) -> Result<Arc<dyn Transport>> {
    match transport {
        TransportConfig::Stdio(stdio) => Ok(Arc::new(StdioTransport::new(
            stdio.clone(),
            Duration::from_millis(config.stdio.kill_grace_ms),
        ))),
        TransportConfig::Sse(remote) => Ok(Arc::new(SseTransport::new(
            remote.clone(),
            Duration::from_millis(config.sse.endpoint_timeout_ms),
        )?)),
        TransportConfig::Http(remote) => {
            Ok(Arc::new(HttpTransport::new(remote.clone(), &config.http)?))
        }
    }
}
