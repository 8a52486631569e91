use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::Mutex;
use toolbridge_core::ServerInfo;
use toolbridge_mcp::tools::{register_terminal_tools, ToolRegistry};
use toolbridge_mcp::McpServer;

/// Settings for the HTTP tool host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Default directory for `list_files`.
    pub project_dir: PathBuf,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, project_dir: PathBuf) -> Self {
        Self {
            host: host.into(),
            port,
            project_dir,
        }
    }

    /// Socket address to bind, as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the tool host served over HTTP: the terminal tools rooted at
    /// the project directory.
    pub fn build_server(&self) -> McpServer {
        let mut registry = ToolRegistry::new();
        register_terminal_tools(&mut registry, self.project_dir.clone());

        McpServer::new(
            ServerInfo::new("Terminal Server", env!("CARGO_PKG_VERSION")),
            registry,
        )
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// One message is handled at a time, as on a stdio connection.
    pub server: Mutex<McpServer>,
    pub sessions: Mutex<HashSet<String>>,
}

impl AppState {
    pub fn new(server: McpServer) -> Self {
        Self {
            server: Mutex::new(server),
            sessions: Mutex::new(HashSet::new()),
        }
    }
}
