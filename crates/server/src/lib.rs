// Streamable-HTTP host: exposes one MCP tool host at POST /mcp

pub mod api;
pub mod config;

pub use api::{router, serve, serve_on, SESSION_HEADER};
pub use config::{AppState, ServerConfig};
