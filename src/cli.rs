//! Command-line interface definition for xzatoma-mcp
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to inspect configured MCP servers, initialize them,
//! and call their tools.

use clap::{Parser, Subcommand};

/// xzatoma-mcp - MCP tool server adapter
///
/// Connects to configured Model Context Protocol servers over stdio, SSE,
/// or HTTP and exposes their tools as `<server>__<tool>`.
#[derive(Parser, Debug, Clone)]
#[command(name = "xzatoma-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml", global = true)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for xzatoma-mcp
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// List configured servers and whether policy permits them (no I/O)
    List,

    /// Initialize one server (if not ready) and print its registered tools
    Init {
        /// Configured server name
        server: String,
    },

    /// Initialize every permitted server and print all registered tools
    Tools,

    /// Call a registered tool
    Call {
        /// Registered tool name (`<server>__<tool>`)
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Print the result as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            command: Commands::List,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert_eq!(cli.command, Commands::List);
    }

    #[test]
    fn test_cli_parse_list() {
        let cli = Cli::try_parse_from(["xzatoma-mcp", "list"]).unwrap();
        assert_eq!(cli.command, Commands::List);
    }

    #[test]
    fn test_cli_parse_init_requires_server() {
        assert!(Cli::try_parse_from(["xzatoma-mcp", "init"]).is_err());
        let cli = Cli::try_parse_from(["xzatoma-mcp", "init", "files"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Init {
                server: "files".to_string()
            }
        );
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "xzatoma-mcp",
            "call",
            "files__read",
            "--args",
            r#"{"path":"a"}"#,
            "--json",
        ])
        .unwrap();
        if let Commands::Call { tool, args, json } = cli.command {
            assert_eq!(tool, "files__read");
            assert_eq!(args, r#"{"path":"a"}"#);
            assert!(json);
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_parse_call_default_args() {
        let cli = Cli::try_parse_from(["xzatoma-mcp", "call", "x__y"]).unwrap();
        if let Commands::Call { args, json, .. } = cli.command {
            assert_eq!(args, "{}");
            assert!(!json);
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xzatoma-mcp",
            "tools",
            "--config",
            "other.yaml",
            "--verbose",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(cli.config, Some("other.yaml".to_string()));
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.command, Commands::Tools);
    }
}
