//! Host-facing tool interface
//!
//! This module contains the tool registry the agent consults each turn and
//! the [`ToolExecutor`] trait every tool implements. The MCP adapter
//! registers one executor per discovered remote tool and removes them again
//! when their server disconnects, so the registry is interior-mutable and
//! shared behind an `Arc`.

use crate::error::{McpError, Result};
use crate::mcp::content::ContentBlock;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tool result structure
///
/// Represents the outcome of one tool call as the normalized content blocks
/// handed back to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Output blocks, in order
    pub content: Vec<ContentBlock>,
    /// Whether the tool reported failure
    pub is_error: bool,
    /// Additional metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful result from content blocks
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed result carrying a single text block
    pub fn error(message: impl Into<String>) -> Self {
        Self::failed(vec![ContentBlock::text(message)])
    }

    /// Create a failed result that still carries content
    pub fn failed(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: true,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result
    ///
    /// # Returns
    ///
    /// Returns self for chaining
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Convert to a message string for the conversation
    ///
    /// Text blocks are joined by newlines; images are summarized by MIME
    /// type. Failed results are prefixed with `Error: `.
    pub fn to_message(&self) -> String {
        let body = self
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::Image { mime_type, data } => {
                    format!("[image {} ({} base64 bytes)]", mime_type, data.len())
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        if self.is_error {
            format!("Error: {}", body)
        } else {
            body
        }
    }
}

/// Tool executor trait for implementing tool execution logic
///
/// # Examples
///
/// ```no_run
/// use xzatoma_mcp::tools::{ToolExecutor, ToolResult};
/// use xzatoma_mcp::mcp::content::ContentBlock;
/// use xzatoma_mcp::error::Result;
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct MyTool;
///
/// #[async_trait]
/// impl ToolExecutor for MyTool {
///     fn tool_definition(&self) -> Value {
///         serde_json::json!({
///             "name": "my_tool",
///             "description": "Does something useful",
///             "parameters": { "type": "object", "properties": {} }
///         })
///     }
///
///     async fn execute(&self, _args: Value) -> Result<ToolResult> {
///         Ok(ToolResult::success(vec![ContentBlock::text("Success")]))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool definition as a JSON value
    ///
    /// The definition follows the function calling format:
    /// `{"name", "description", "parameters": <JSON schema>}`.
    fn tool_definition(&self) -> serde_json::Value;

    /// Executes the tool with the given arguments
    ///
    /// # Errors
    ///
    /// Returns error when the tool could not be run at all (as opposed to
    /// running and reporting failure through [`ToolResult::is_error`]).
    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult>;
}

/// Tool registry for managing available tools
///
/// Shared between the agent and the MCP adapter; all methods take `&self`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn ToolExecutor>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<dyn ToolExecutor>>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn ToolExecutor>>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a tool executor, replacing any tool with the same name
    pub fn register(&self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        let name = name.into();
        tracing::debug!(tool = %name, "Registering tool");
        self.write().insert(name, executor);
    }

    /// Remove a tool. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            tracing::debug!(tool = %name, "Unregistered tool");
        }
        removed
    }

    /// Remove every tool whose name starts with `prefix`. Returns the
    /// removed names.
    pub fn unregister_prefix(&self, prefix: &str) -> Vec<String> {
        let mut tools = self.write();
        let names: Vec<String> = tools
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &names {
            tools.remove(name);
        }
        names
    }

    /// Get a tool executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.read().get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Get all tool definitions as JSON values
    pub fn all_definitions(&self) -> Vec<serde_json::Value> {
        self.read()
            .values()
            .map(|executor| executor.tool_definition())
            .collect()
    }

    /// Call a registered tool by name
    ///
    /// # Errors
    ///
    /// Returns [`McpError::UnknownTool`] if no tool has this name, or
    /// whatever the executor itself fails with.
    pub async fn call(&self, name: &str, args: serde_json::Value) -> Result<ToolResult> {
        let executor = self
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        executor.execute(args).await
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
