//! Configuration types for the toolbridge client.

use std::time::Duration;
use toolbridge_core::ClientInfo;

/// Default bound on connect + handshake + catalog for one server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single request once connected.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How tools from different servers are named in the merged list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingPolicy {
    /// Keep bare tool names; on a collision the earliest server wins.
    #[default]
    FirstWins,
    /// Expose every tool as `server.tool`.
    Qualified,
}

impl NamingPolicy {
    /// Name under which `tool` from `server` is exposed.
    pub fn exposed_name(&self, server: &str, tool: &str) -> String {
        match self {
            Self::FirstWins => tool.to_string(),
            Self::Qualified => format!("{}.{}", server, tool),
        }
    }
}

/// Configuration for the toolset aggregator.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time allowed for one server to connect, handshake and list its tools.
    pub connect_timeout: Duration,
    /// Time allowed for each request after loading.
    pub request_timeout: Duration,
    /// Naming of merged tools.
    pub naming: NamingPolicy,
    /// Identity sent in `initialize`.
    pub client_info: ClientInfo,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            naming: NamingPolicy::default(),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-server load timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the naming policy for merged tools.
    pub fn naming(mut self, naming: NamingPolicy) -> Self {
        self.naming = naming;
        self
    }

    /// Set the client identity sent during the handshake.
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }
}
