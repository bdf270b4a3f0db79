//! Configuration management for xzatoma-mcp
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{McpError, Result};
use crate::mcp::config::{McpConfig, TOOL_NAME_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for xzatoma-mcp
///
/// This structure holds the `mcp:` block: adapter settings, per-transport
/// tunables, and the named server list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// MCP adapter configuration
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged. Environment overrides are applied on top of whatever was
    /// loaded.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use xzatoma_mcp::cli::Cli;
    /// use xzatoma_mcp::config::Config;
    ///
    /// let config = Config::load("config/config.yaml", &Cli::default()).unwrap();
    /// config.validate().unwrap();
    /// ```
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse a YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if the file cannot be read or parsed
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| McpError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Some(value) = env_number("XZATOMA_MCP_REQUEST_TIMEOUT_MS") {
            self.mcp.request_timeout_ms = value;
        }

        if let Some(value) = env_number("XZATOMA_MCP_HTTP_RETRIES") {
            self.mcp.http.retries = value;
        }

        if let Some(value) = env_number("XZATOMA_MCP_HTTP_RETRY_DELAY_MS") {
            self.mcp.http.retry_delay_ms = value;
        }

        if let Some(value) = env_number("XZATOMA_MCP_KILL_GRACE_MS") {
            self.mcp.stdio.kill_grace_ms = value;
        }

        if let Ok(trust_all) = std::env::var("XZATOMA_MCP_TRUST_ALL") {
            match trust_all.parse::<bool>() {
                Ok(value) => {
                    self.mcp.trust_all = value;
                    tracing::debug!(trust_all = value, "Env override: XZATOMA_MCP_TRUST_ALL");
                }
                Err(_) => tracing::warn!("Invalid XZATOMA_MCP_TRUST_ALL: {}", trust_all),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// Ensures timeouts are non-zero and that every server name can be
    /// used as a tool name prefix.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.mcp.request_timeout_ms == 0 {
            return Err(
                McpError::Config("mcp.request_timeout_ms must be greater than 0".to_string())
                    .into(),
            );
        }

        if self.mcp.sse.endpoint_timeout_ms == 0 {
            return Err(McpError::Config(
                "mcp.sse.endpoint_timeout_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.client_name.trim().is_empty() {
            return Err(McpError::Config("mcp.client_name cannot be empty".to_string()).into());
        }

        for (name, server) in &self.mcp.servers {
            if name.trim().is_empty() {
                return Err(McpError::Config("MCP server name cannot be empty".to_string()).into());
            }
            if name.contains(TOOL_NAME_SEPARATOR) {
                return Err(McpError::Config(format!(
                    "MCP server name `{}` cannot contain `{}`",
                    name, TOOL_NAME_SEPARATOR
                ))
                .into());
            }
            if server.request_timeout_ms == Some(0) {
                return Err(McpError::Config(format!(
                    "mcp.servers.{}.request_timeout_ms must be greater than 0",
                    name
                ))
                .into());
            }
        }

        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => {
            tracing::debug!("Env override: {}={}", key, raw);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("Invalid {}: {}", key, raw);
            None
        }
    }
}
