//! xzatoma-mcp - MCP tool server adapter
//!
#![doc = "Main entry point for the xzatoma-mcp command-line tool."]

use anyhow::Result;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xzatoma_mcp::cli::{Cli, Commands};
use xzatoma_mcp::commands;
use xzatoma_mcp::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::List => commands::mcp::list_servers(&config),
        Commands::Init { server } => {
            tracing::info!(server = %server, "Initializing MCP server");
            commands::mcp::init_server(&config, &server).await
        }
        Commands::Tools => {
            tracing::info!("Initializing all permitted MCP servers");
            commands::mcp::list_tools(&config).await
        }
        Commands::Call { tool, args, json } => {
            tracing::debug!(tool = %tool, "Calling MCP tool");
            commands::mcp::call_tool(&config, &tool, &args, json).await
        }
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
fn init_tracing(verbose: bool, json_logs: bool) {
    let default_level = if verbose {
        "xzatoma_mcp=debug"
    } else {
        "xzatoma_mcp=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
