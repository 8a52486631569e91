//! List the tools of every configured MCP server.
//!
//! Reads a JSON file shaped like `{"server-name": {"command": ..., "args": [...]}}`
//! and prints the merged tool list. An entry whose command is
//! `streamable_http` is reached at the URL in its first argument.
//!
//! Run with: cargo run --example list_tools -- servers.json

use std::collections::HashMap;
use toolbridge_sdk::{descriptors_from_map, ClientConfig, ClientError, ServerEntry, ToolsetAggregator};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "servers.json".to_string());
    let content = std::fs::read_to_string(&path)?;
    let entries: HashMap<String, ServerEntry> = serde_json::from_str(&content)?;

    let aggregator = ToolsetAggregator::new(descriptors_from_map(entries), ClientConfig::default());
    let result = aggregator.load_all().await;

    for (server, toolset) in &result.loaded {
        println!("Loaded tools from server '{}': {}", server, toolset.tool_names().join(", "));
    }
    for (server, error) in &result.failed {
        println!("Error loading tools from server '{}': {}", server, error);
    }

    println!("\n{} tools available:", result.tools().len());
    for tool in result.tools() {
        println!("  {:<20} [{}] {}", tool.name(), tool.server(), tool.description());
    }

    aggregator.close().await;
    Ok(())
}
