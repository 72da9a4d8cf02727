//! MCP server binary
//!
//! Runs waveboard as an MCP server over stdio for integration with an AI
//! coding assistant.
//!
//! # Usage
//!
//! ```bash
//! # Run directly
//! ./mcp_server
//!
//! # With a custom registry location
//! WAVE_HOME=/srv/wave ./mcp_server
//!
//! # With debug logging (stderr; stdout carries the protocol)
//! RUST_LOG=debug ./mcp_server
//! ```
//!
//! # Client integration
//!
//! Add to the assistant's MCP settings (e.g. `~/.claude/mcp.json`):
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "waveboard": {
//!       "command": "/path/to/mcp_server"
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waveboard::mcp::{McpServer, ToolHandler};
use waveboard::project::ProjectRegistry;
use waveboard::Config;

/// MCP server for waveboard task management
#[derive(Parser, Debug)]
#[command(name = "mcp_server")]
#[command(about = "MCP server exposing waveboard task tools")]
#[command(version)]
struct Args {
    /// Directory holding the global project registry
    #[arg(long, env = "WAVE_HOME")]
    wave_home: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logging to stderr to keep stdout clean for MCP
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("waveboard=info".parse()?))
        .init();

    let args = Args::parse();

    let config = match args.wave_home {
        Some(home) => Config {
            registry_path: std::path::PathBuf::from(home).join("projects.json"),
        },
        None => Config::from_env(),
    };
    info!("registry: {}", config.registry_path.display());

    let registry = ProjectRegistry::new(config.registry_path);
    let handler = ToolHandler::new(registry);
    let mut server = McpServer::new(handler);

    if let Err(e) = server.run().await {
        error!("MCP server error: {}", e);
        return Err(e);
    }
    Ok(())
}
