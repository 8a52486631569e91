// MCP tool host: a registry of named tools served over line-delimited JSON-RPC

pub mod server;
pub mod tools;

pub use server::{McpServer, ServerState};
pub use tools::{Tool, ToolRegistry};
