use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use toolbridge_server::{serve, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "toolbridge-http")]
#[command(about = "Serve the terminal tools over streamable HTTP", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "TOOLBRIDGE_PORT", default_value = "8931")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "TOOLBRIDGE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Default directory for list_files
    #[arg(short = 'd', long, env = "TOOLBRIDGE_PROJECT_DIR")]
    project_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolbridge=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    let project_dir = match args.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = ServerConfig::new(args.host, args.port, project_dir);

    tracing::info!("Starting terminal tool host");
    tracing::info!("Project directory: {}", config.project_dir.display());

    let server = config.build_server();
    let addr = config.addr();

    tokio::select! {
        result = serve(&addr, server) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Server stopped by interrupt"),
    }

    Ok(())
}
