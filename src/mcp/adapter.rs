//! MCP adapter orchestrator
//!
//! [`McpAdapter`] owns one [`ServerSession`] per configured server that the
//! policy gate permits. It initializes servers lazily on the first of two
//! triggers, the agent's pre-turn hook ([`McpAdapter::before_turn`]) or a
//! manual command ([`McpAdapter::trigger`]). Either way the work runs once
//! per server: concurrent triggers share one in-flight attempt that runs
//! `initialize`, then `tools/list`, then registers each discovered tool in
//! the shared [`ToolRegistry`] as `<server>__<tool>`.
//!
//! When a transport reports a disconnect, the server's tools are removed
//! from the registry and the session returns to uninitialized. Nothing
//! reconnects until the next trigger. A disconnect during initialization
//! discards that attempt's tools, and so does a shutdown.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::{join_all, FutureExt};
use serde_json::{json, Value};

use crate::error::{McpError, Result};
use crate::mcp::config::{McpConfig, ServerConfig, TOOL_NAME_SEPARATOR};
use crate::mcp::content::map_content;
use crate::mcp::factory::{DefaultTransportFactory, TransportFactory};
use crate::mcp::policy::PolicyGate;
use crate::mcp::session::{InitHandle, Join, ServerSession, SessionStatus};
use crate::mcp::transport::DisconnectReason;
use crate::mcp::types::{Implementation, McpTool};
use crate::tools::{ToolExecutor, ToolRegistry, ToolResult};

/// Registered name for `tool` on `server`.
///
/// # Examples
///
/// ```
/// use xzatoma_mcp::mcp::adapter::registered_tool_name;
///
/// assert_eq!(registered_tool_name("files", "read"), "files__read");
/// ```
pub fn registered_tool_name(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, TOOL_NAME_SEPARATOR, tool)
}

/// Status snapshot for one configured server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Server name
    pub name: String,
    /// Transport kind (`stdio`, `sse`, `http`)
    pub kind: &'static str,
    /// Command line or URL
    pub endpoint: String,
    /// Whether the policy gate permitted the server
    pub permitted: bool,
    /// Lifecycle state; `None` for denied servers
    pub status: Option<SessionStatus>,
    /// Whether the transport currently reports itself connected
    pub connected: bool,
    /// Number of registered tools
    pub tool_count: usize,
}

/// Lazily-initializing bridge between MCP servers and the tool registry.
pub struct McpAdapter {
    sessions: BTreeMap<String, Arc<ServerSession>>,
    denied: BTreeMap<String, ServerConfig>,
    registry: Arc<ToolRegistry>,
    client_info: Implementation,
}

impl std::fmt::Debug for McpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpAdapter")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("denied", &self.denied.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpAdapter {
    /// Build the adapter with the real transports.
    ///
    /// No I/O happens here; transports are constructed but not started.
    ///
    /// # Errors
    ///
    /// Returns an error if a permitted server's transport cannot be built.
    pub fn new(
        config: &McpConfig,
        registry: Arc<ToolRegistry>,
        policy: &dyn PolicyGate,
    ) -> Result<Self> {
        Self::with_factory(
            config,
            registry,
            policy,
            &DefaultTransportFactory::new(config),
        )
    }

    /// Build the adapter with a custom transport factory.
    ///
    /// # Errors
    ///
    /// Returns an error if a permitted server's transport cannot be built.
    pub fn with_factory(
        config: &McpConfig,
        registry: Arc<ToolRegistry>,
        policy: &dyn PolicyGate,
        factory: &dyn TransportFactory,
    ) -> Result<Self> {
        let mut sessions = BTreeMap::new();
        let mut denied = BTreeMap::new();

        for (name, server) in &config.servers {
            if !policy.allows(name, server) {
                tracing::warn!(
                    server = %name,
                    "MCP server is not permitted by policy; skipping"
                );
                denied.insert(name.clone(), server.clone());
                continue;
            }

            let transport = factory.create(name, server)?;
            let session = Arc::new(ServerSession::new(
                name.clone(),
                server.clone(),
                transport.clone(),
                config.request_timeout_for(server),
            ));

            let weak_session = Arc::downgrade(&session);
            let weak_registry = Arc::downgrade(&registry);
            transport.on_disconnect(Arc::new(move |reason: DisconnectReason| {
                handle_disconnect(&weak_session, &weak_registry, &reason);
            }));

            sessions.insert(name.clone(), session);
        }

        Ok(Self {
            sessions,
            denied,
            registry,
            client_info: Implementation {
                name: config.client_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    /// The shared tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Names of the permitted servers.
    pub fn server_names(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Session for `name`, if it is permitted.
    pub fn session(&self, name: &str) -> Option<&Arc<ServerSession>> {
        self.sessions.get(name)
    }

    /// Snapshot of every configured server, permitted or not.
    pub fn statuses(&self) -> Vec<ServerStatus> {
        let permitted = self.sessions.values().map(|s| ServerStatus {
            name: s.name().to_string(),
            kind: s.config().transport.kind(),
            endpoint: s.config().transport.endpoint(),
            permitted: true,
            status: Some(s.status()),
            connected: s.transport().is_connected(),
            tool_count: s.registered_names().len(),
        });
        let denied = self.denied.iter().map(|(name, server)| ServerStatus {
            name: name.clone(),
            kind: server.transport.kind(),
            endpoint: server.transport.endpoint(),
            permitted: false,
            status: None,
            connected: false,
            tool_count: 0,
        });
        let mut all: Vec<ServerStatus> = permitted.chain(denied).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Manual trigger: make sure `server` is initialized and return its
    /// registered tool names.
    ///
    /// A server that is already ready returns immediately. A server whose
    /// initialization is in flight is awaited, not re-initialized.
    ///
    /// # Errors
    ///
    /// - [`McpError::UnknownServer`] if no server has this name
    /// - [`McpError::PolicyDenied`] if the policy gate refused it
    /// - [`McpError::InitializationFailed`] if the shared attempt failed or
    ///   the adapter was shut down
    pub async fn trigger(&self, server: &str) -> Result<Vec<String>> {
        let Some(session) = self.sessions.get(server) else {
            if self.denied.contains_key(server) {
                return Err(McpError::PolicyDenied(server.to_string()).into());
            }
            return Err(McpError::UnknownServer(server.to_string()).into());
        };

        let join = session.join_or_begin(|| {
            spawn_initialization(
                session.clone(),
                self.registry.clone(),
                self.client_info.clone(),
            )
        });
        match join {
            Join::Ready(names) => Ok(names),
            Join::Wait(handle) => session.outcome(handle.await),
            Join::Closed => session.outcome(Err("adapter shut down".to_string())),
        }
    }

    /// Pre-turn hook: trigger every permitted server concurrently.
    ///
    /// Failures are logged as warnings and reported per server; they never
    /// stop other servers from initializing.
    pub async fn before_turn(&self) -> BTreeMap<String, Result<Vec<String>>> {
        let names = self.server_names();
        let outcomes = join_all(names.iter().map(|name| self.trigger(name))).await;
        names
            .into_iter()
            .zip(outcomes)
            .inspect(|(name, outcome)| {
                if let Err(e) = outcome {
                    tracing::warn!(server = %name, error = %e, "MCP server unavailable this turn");
                }
            })
            .collect()
    }

    /// Invoke a registered tool.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::UnknownTool`] for unregistered names and
    /// propagates transport failures (connection, timeout, lost
    /// connection). Remote tool errors come back as a failed
    /// [`ToolResult`] instead.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<ToolResult> {
        self.registry.call(name, args).await
    }

    /// Stop every transport and unregister every MCP tool.
    ///
    /// An initialization still in flight is awaited after its transport is
    /// stopped, so no tool is registered once this returns.
    pub async fn shutdown(&self) {
        for session in self.sessions.values() {
            let (in_flight, registered) = session.close();
            for name in registered {
                self.registry.unregister(&name);
            }
            if let Err(e) = session.transport().stop().await {
                tracing::warn!(server = %session.name(), error = %e, "Failed to stop MCP transport");
            }
            if let Some(handle) = in_flight {
                let _ = handle.await;
            }
        }
    }
}

fn handle_disconnect(
    session: &Weak<ServerSession>,
    registry: &Weak<ToolRegistry>,
    reason: &DisconnectReason,
) {
    let (Some(session), Some(registry)) = (session.upgrade(), registry.upgrade()) else {
        return;
    };
    for name in session.reset_after_disconnect(reason) {
        registry.unregister(&name);
    }
}

/// Spawn the initialization body and wrap its join handle in a shared
/// future. The body runs to completion even if every trigger is dropped.
fn spawn_initialization(
    session: Arc<ServerSession>,
    registry: Arc<ToolRegistry>,
    client_info: Implementation,
) -> InitHandle {
    tracing::debug!(server = %session.name(), "Starting MCP server initialization");
    let task = tokio::spawn(initialize_session(session, registry, client_info));
    async move {
        task.await
            .unwrap_or_else(|e| Err(format!("initialization task aborted: {}", e)))
    }
    .boxed()
    .shared()
}

async fn initialize_session(
    session: Arc<ServerSession>,
    registry: Arc<ToolRegistry>,
    client_info: Implementation,
) -> std::result::Result<Vec<String>, String> {
    match session.handshake(client_info).await {
        Ok(tools) => {
            let mut names = Vec::with_capacity(tools.len());
            for tool in &tools {
                let registered = registered_tool_name(session.name(), &tool.name);
                registry.register(
                    registered.clone(),
                    Arc::new(McpToolExecutor::new(
                        session.clone(),
                        tool.clone(),
                        registered.clone(),
                    )),
                );
                names.push(registered);
            }
            if let Err(message) = session.mark_ready(tools, names.clone()) {
                for name in &names {
                    registry.unregister(name);
                }
                tracing::warn!(server = %session.name(), error = %message, "Discarding MCP initialization result");
                if session.is_closed() {
                    if let Err(e) = session.transport().stop().await {
                        tracing::warn!(server = %session.name(), error = %e, "Failed to stop MCP transport");
                    }
                }
                return Err(message);
            }
            tracing::info!(
                server = %session.name(),
                tool_count = names.len(),
                "MCP tools registered"
            );
            Ok(names)
        }
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::warn!(server = %session.name(), error = %message, "MCP server initialization failed");
            session.mark_failed(message.clone());
            Err(message)
        }
    }
}

/// Executes one remote MCP tool through its server session.
pub struct McpToolExecutor {
    session: Arc<ServerSession>,
    tool: McpTool,
    registered_name: String,
}

impl McpToolExecutor {
    /// Wrap `tool` from `session`, registered as `registered_name`.
    pub fn new(session: Arc<ServerSession>, tool: McpTool, registered_name: String) -> Self {
        Self {
            session,
            tool,
            registered_name,
        }
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    fn tool_definition(&self) -> Value {
        let description = self
            .tool
            .description
            .clone()
            .or_else(|| self.tool.title.clone())
            .unwrap_or_else(|| {
                format!(
                    "Tool `{}` from MCP server `{}`",
                    self.tool.name,
                    self.session.name()
                )
            });
        json!({
            "name": self.registered_name,
            "description": description,
            "parameters": self.tool.input_schema,
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let arguments = match args {
            Value::Null => None,
            other => Some(other),
        };
        tracing::debug!(tool = %self.registered_name, "Calling MCP tool");

        let result = match self
            .session
            .protocol()
            .call_tool(&self.tool.name, arguments)
            .await
        {
            Ok(response) => {
                let blocks = map_content(&response.content);
                if response.is_error == Some(true) {
                    ToolResult::failed(blocks)
                } else {
                    ToolResult::success(blocks)
                }
            }
            Err(e) => match e.downcast_ref::<McpError>() {
                Some(McpError::Remote { code, message }) => {
                    ToolResult::error(format!("MCP error {}: {}", code, message))
                }
                _ => return Err(e),
            },
        };
        Ok(result
            .with_metadata("server", self.session.name())
            .with_metadata("tool", self.tool.name.as_str()))
    }
}
