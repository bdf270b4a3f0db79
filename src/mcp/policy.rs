//! Policy gate deciding which configured servers may run
//!
//! The gate is consulted once per server when the adapter is built. A
//! server it refuses never gets a session or a transport, so no process is
//! spawned and no request is sent for it.

use crate::mcp::config::{McpConfig, ServerConfig};

/// Decides whether a configured server is permitted to run.
pub trait PolicyGate: Send + Sync {
    /// Returns true if `server` (configured as `name`) may be initialized.
    fn allows(&self, name: &str, server: &ServerConfig) -> bool;
}

impl<F> PolicyGate for F
where
    F: Fn(&str, &ServerConfig) -> bool + Send + Sync,
{
    fn allows(&self, name: &str, server: &ServerConfig) -> bool {
        self(name, server)
    }
}

/// Permits every server.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyGate for AllowAll {
    fn allows(&self, _name: &str, _server: &ServerConfig) -> bool {
        true
    }
}

/// Honours each server's `trusted` flag, or permits everything when
/// `trust_all` is set.
///
/// # Examples
///
/// ```
/// use xzatoma_mcp::mcp::config::ServerConfig;
/// use xzatoma_mcp::mcp::policy::{PolicyGate, TrustPolicy};
///
/// let gate = TrustPolicy::new(false);
/// assert!(!gate.allows("tmp", &ServerConfig::stdio("cat", vec![])));
/// assert!(gate.allows("tmp", &ServerConfig::stdio("cat", vec![]).trusted(true)));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustPolicy {
    trust_all: bool,
}

impl TrustPolicy {
    /// Create a trust policy.
    pub fn new(trust_all: bool) -> Self {
        Self { trust_all }
    }

    /// Trust policy taken from the `mcp:` configuration block.
    pub fn from_config(config: &McpConfig) -> Self {
        Self::new(config.trust_all)
    }
}

impl PolicyGate for TrustPolicy {
    fn allows(&self, _name: &str, server: &ServerConfig) -> bool {
        self.trust_all || server.trusted
    }
}
