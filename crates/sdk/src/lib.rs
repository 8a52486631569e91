//! # Toolbridge SDK
//!
//! Client side of toolbridge: connect to MCP tool hosts over stdio or
//! streamable HTTP and expose the union of their tools.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolbridge_sdk::{ClientConfig, ServerDescriptor, ToolsetAggregator};
//!
//! #[tokio::main]
//! async fn main() -> toolbridge_sdk::ClientResult<()> {
//!     let servers = vec![
//!         ServerDescriptor::stdio("terminal", "toolbridge-mcp", Vec::<String>::new()),
//!         ServerDescriptor::http("remote", "http://127.0.0.1:8931/mcp"),
//!     ];
//!     let aggregator = ToolsetAggregator::new(servers, ClientConfig::default());
//!
//!     let result = aggregator.load_all().await;
//!     for (server, error) in &result.failed {
//!         eprintln!("{} unavailable: {}", server, error);
//!     }
//!
//!     for tool in result.tools() {
//!         println!("{} ({}): {}", tool.name(), tool.server(), tool.description());
//!     }
//!
//!     aggregator.close().await;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod discovery;
pub mod error;
pub mod peer;
pub mod transport;

pub use aggregator::{AggregateResult, ShadowedTool, ToolHandle, Toolset, ToolsetAggregator};
pub use config::{ClientConfig, NamingPolicy};
pub use discovery::{
    descriptors_from_map, Discovery, ServerDescriptor, ServerEntry, StaticDiscovery, TransportKind,
};
pub use error::{ClientError, ClientResult, LoadError};
pub use peer::McpPeer;
pub use transport::{Connector, DefaultConnector, HttpTransport, StdioTransport, StreamTransport, Transport};
