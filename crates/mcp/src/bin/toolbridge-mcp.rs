// Standalone stdio tool host binary

use anyhow::Result;
use std::path::PathBuf;
use toolbridge_core::ServerInfo;
use toolbridge_mcp::server::McpServer;
use toolbridge_mcp::tools::{register_terminal_tools, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries protocol messages only, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    tracing::info!("Terminal tool host starting...");

    let project_dir = match std::env::var("TOOLBRIDGE_PROJECT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?,
    };
    tracing::info!("Project directory: {}", project_dir.display());

    let mut registry = ToolRegistry::new();
    register_terminal_tools(&mut registry, project_dir);
    tracing::info!("Registered {} tools", registry.len());

    let mut server = McpServer::new(
        ServerInfo::new("Terminal Server", env!("CARGO_PKG_VERSION")),
        registry,
    );

    tokio::select! {
        result = server.serve_stdio() => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "Fatal error in serve loop");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            // A pending stdin read would keep the runtime alive, so exit directly.
            tracing::info!("Server stopped by interrupt");
            std::process::exit(0);
        }
    }

    tracing::info!("Server shutting down");
    Ok(())
}
