//! Typed MCP lifecycle over a [`Transport`]
//!
//! [`McpProtocol`] turns the raw request/response contract of a transport
//! into the three MCP operations the adapter needs:
//!
//! - [`McpProtocol::initialize`] -- the `initialize` request, a protocol
//!   version check, then the `notifications/initialized` notification.
//! - [`McpProtocol::list_tools`] -- `tools/list`, following `nextCursor`
//!   until the server stops returning one or returns a cursor it already
//!   returned.
//! - [`McpProtocol::call_tool`] -- `tools/call`.
//!
//! Request ids come from a per-protocol monotonically increasing counter,
//! so they are unique among the requests in flight on its transport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{McpError, Result};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, JsonRpcNotification, JsonRpcRequest, ListToolsResponse, McpTool,
    PaginatedParams, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Typed MCP client over one transport.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use xzatoma_mcp::mcp::protocol::McpProtocol;
/// use xzatoma_mcp::mcp::transport::Transport;
/// use xzatoma_mcp::mcp::types::Implementation;
///
/// # async fn demo(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
/// let proto = McpProtocol::new(transport, Duration::from_secs(30));
/// proto
///     .initialize(Implementation { name: "xzatoma-mcp".into(), version: "0.2.0".into() })
///     .await?;
/// let tools = proto.list_tools().await?;
/// # let _ = tools;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct McpProtocol {
    transport: Arc<dyn Transport>,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl McpProtocol {
    /// Wrap `transport`; every request gets `timeout` as its deadline.
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
            timeout,
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send a typed request and decode its result.
    ///
    /// # Errors
    ///
    /// Transport errors propagate unchanged. A JSON-RPC error object
    /// becomes [`McpError::Remote`]; an undecodable result becomes
    /// [`McpError::Protocol`].
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = serde_json::to_value(params).map_err(McpError::from)?;
        let request = JsonRpcRequest::new(id, method, params);

        let response = self.transport.send(request, self.timeout).await?;
        let result = response.into_result()?;
        serde_json::from_value(result).map_err(|e| {
            McpError::Protocol(format!("invalid `{}` result: {}", method, e)).into()
        })
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<()> {
        self.transport
            .notify(JsonRpcNotification::new(method, params))
            .await
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Protocol`] if the server picks a protocol version
    /// outside [`SUPPORTED_PROTOCOL_VERSIONS`].
    pub async fn initialize(&self, client_info: Implementation) -> Result<InitializeResponse> {
        let response: InitializeResponse = self
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities: ClientCapabilities::default(),
                    client_info,
                },
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(McpError::Protocol(format!(
                "unsupported protocol version `{}` (supported: {})",
                response.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            ))
            .into());
        }

        self.notify(METHOD_INITIALIZED, serde_json::json!({})).await?;

        tracing::debug!(
            server = %response.server_info.name,
            version = %response.server_info.version,
            protocol = %response.protocol_version,
            "MCP handshake complete"
        );
        Ok(response)
    }

    /// List every tool, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let page: ListToolsResponse = self
                .request(
                    METHOD_TOOLS_LIST,
                    PaginatedParams {
                        cursor: cursor.clone(),
                    },
                )
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    tracing::warn!(cursor = %next, "MCP server repeated a tools/list cursor; stopping");
                    break;
                }
                None => break,
            }
        }
        Ok(tools)
    }

    /// Invoke one tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.request(
            METHOD_TOOLS_CALL,
            CallToolParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
    }
}
