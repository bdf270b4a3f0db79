//! MCP client configuration types
//!
//! This module defines the `mcp:` block of the configuration file: global
//! adapter settings, per-transport tunables, and the named list of servers.
//! Server entries are decoded through an intermediate raw shape so that
//! each one resolves to exactly one [`TransportConfig`] variant, and a
//! contradictory entry fails at load time rather than at first use.

use std::collections::{BTreeMap, HashMap};
use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Separator between server name and tool name in registered tool names.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// MCP client configuration
///
/// Defaults to an empty server list so that YAML files omitting the `mcp:`
/// key still deserialize.
///
/// # Examples
///
/// ```
/// use xzatoma_mcp::mcp::config::McpConfig;
///
/// let cfg = McpConfig::default();
/// assert!(cfg.servers.is_empty());
/// assert_eq!(cfg.http.retries, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Client name advertised in `initialize`
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Default per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Subprocess transport settings
    #[serde(default)]
    pub stdio: StdioSettings,
    /// SSE transport settings
    #[serde(default)]
    pub sse: SseSettings,
    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpSettings,
    /// Treat every server as trusted regardless of its `trusted` flag
    #[serde(default)]
    pub trust_all: bool,
    /// Configured servers keyed by name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

fn default_client_name() -> String {
    "xzatoma-mcp".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            request_timeout_ms: default_request_timeout_ms(),
            stdio: StdioSettings::default(),
            sse: SseSettings::default(),
            http: HttpSettings::default(),
            trust_all: false,
            servers: BTreeMap::new(),
        }
    }
}

impl McpConfig {
    /// Request deadline for `server`, honouring its per-server override.
    pub fn request_timeout_for(&self, server: &ServerConfig) -> Duration {
        Duration::from_millis(server.request_timeout_ms.unwrap_or(self.request_timeout_ms))
    }
}

/// Subprocess transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioSettings {
    /// Time between SIGTERM and SIGKILL when force-terminating a server
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

impl Default for StdioSettings {
    fn default() -> Self {
        Self {
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

/// SSE transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseSettings {
    /// How long `start()` waits for the `endpoint` event
    #[serde(default = "default_endpoint_timeout_ms")]
    pub endpoint_timeout_ms: u64,
}

fn default_endpoint_timeout_ms() -> u64 {
    10_000
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            endpoint_timeout_ms: default_endpoint_timeout_ms(),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Internal retries after the first failed POST
    #[serde(default = "default_http_retries")]
    pub retries: u32,
    /// Fixed delay between retries
    #[serde(default = "default_http_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_http_retries() -> u32 {
    2
}

fn default_http_retry_delay_ms() -> u64 {
    1_000
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            retries: default_http_retries(),
            retry_delay_ms: default_http_retry_delay_ms(),
        }
    }
}

/// One configured MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig", into = "RawServerConfig")]
pub struct ServerConfig {
    /// How to reach the server
    pub transport: TransportConfig,
    /// Trust flag consumed by the policy gate
    pub trusted: bool,
    /// Per-server request deadline override in milliseconds
    pub request_timeout_ms: Option<u64>,
}

impl ServerConfig {
    /// A subprocess server.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: TransportConfig::Stdio(StdioTransportConfig {
                command: command.into(),
                args,
                env: HashMap::new(),
                cwd: None,
            }),
            trusted: false,
            request_timeout_ms: None,
        }
    }

    /// An SSE server.
    pub fn sse(url: Url) -> Self {
        Self::remote(TransportConfig::Sse(RemoteTransportConfig {
            url,
            headers: BTreeMap::new(),
        }))
    }

    /// A plain HTTP server.
    pub fn http(url: Url) -> Self {
        Self::remote(TransportConfig::Http(RemoteTransportConfig {
            url,
            headers: BTreeMap::new(),
        }))
    }

    fn remote(transport: TransportConfig) -> Self {
        Self {
            transport,
            trusted: false,
            request_timeout_ms: None,
        }
    }

    /// Builder-style trust flag.
    pub fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Builder-style request timeout override.
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }
}

/// Transport variant for a server. Immutable once a transport is built
/// from it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON over stdio
    Stdio(StdioTransportConfig),
    /// Long-lived SSE stream plus POST endpoint
    Sse(RemoteTransportConfig),
    /// One POST per request
    Http(RemoteTransportConfig),
}

impl TransportConfig {
    /// Short name of the transport kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio(_) => "stdio",
            TransportConfig::Sse(_) => "sse",
            TransportConfig::Http(_) => "http",
        }
    }

    /// Human-readable endpoint: the command line or the URL.
    pub fn endpoint(&self) -> String {
        match self {
            TransportConfig::Stdio(s) => {
                if s.args.is_empty() {
                    s.command.clone()
                } else {
                    format!("{} {}", s.command, s.args.join(" "))
                }
            }
            TransportConfig::Sse(r) | TransportConfig::Http(r) => r.url.to_string(),
        }
    }
}

/// Subprocess launch settings
#[derive(Debug, Clone, PartialEq)]
pub struct StdioTransportConfig {
    /// Executable to run
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables layered over the parent environment
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

/// URL and headers for SSE and HTTP servers
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTransportConfig {
    /// Stream URL (SSE) or POST URL (HTTP)
    pub url: Url,
    /// Headers sent with every request
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    trusted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_timeout_ms: Option<u64>,
}

fn parse_remote_url(raw: Option<String>, kind: &str) -> Result<Url, String> {
    let raw = raw.ok_or_else(|| format!("`{}` server requires a `url`", kind))?;
    let url = Url::parse(&raw).map_err(|e| format!("invalid url `{}`: {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!(
            "unsupported url scheme `{}` in `{}` (expected http or https)",
            other, raw
        )),
    }
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = String;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let kind = raw.kind.as_deref().unwrap_or("stdio");
        let transport = match kind {
            "stdio" => {
                if raw.url.is_some() || !raw.headers.is_empty() {
                    return Err("stdio server cannot have `url` or `headers`".to_string());
                }
                let command = raw
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| "stdio server requires a non-empty `command`".to_string())?;
                TransportConfig::Stdio(StdioTransportConfig {
                    command,
                    args: raw.args,
                    env: raw.env,
                    cwd: raw.cwd,
                })
            }
            "sse" | "http" => {
                if raw.command.is_some() || !raw.args.is_empty() || !raw.env.is_empty() {
                    return Err(format!(
                        "`{}` server cannot have `command`, `args`, or `env`",
                        kind
                    ));
                }
                let remote = RemoteTransportConfig {
                    url: parse_remote_url(raw.url, kind)?,
                    headers: raw.headers,
                };
                if kind == "sse" {
                    TransportConfig::Sse(remote)
                } else {
                    TransportConfig::Http(remote)
                }
            }
            other => {
                return Err(format!(
                    "unknown server kind `{}` (expected stdio, sse, or http)",
                    other
                ))
            }
        };

        Ok(ServerConfig {
            transport,
            trusted: raw.trusted,
            request_timeout_ms: raw.request_timeout_ms,
        })
    }
}

impl From<ServerConfig> for RawServerConfig {
    fn from(server: ServerConfig) -> Self {
        let mut raw = RawServerConfig {
            trusted: server.trusted,
            request_timeout_ms: server.request_timeout_ms,
            ..Default::default()
        };
        match server.transport {
            TransportConfig::Stdio(s) => {
                raw.command = Some(s.command);
                raw.args = s.args;
                raw.env = s.env;
                raw.cwd = s.cwd;
            }
            TransportConfig::Sse(r) => {
                raw.kind = Some("sse".to_string());
                raw.url = Some(r.url.to_string());
                raw.headers = r.headers;
            }
            TransportConfig::Http(r) => {
                raw.kind = Some("http".to_string());
                raw.url = Some(r.url.to_string());
                raw.headers = r.headers;
            }
        }
        raw
    }
}
