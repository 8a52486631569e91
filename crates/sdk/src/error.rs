//! Error types for the toolbridge client.

use std::time::Duration;
use toolbridge_core::{EncodeError, JsonRpcError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while talking to a single tool host.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The host process could not be started.
    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP endpoint answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Reading from or writing to the host failed.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed, locally or by the host.
    #[error("Connection closed")]
    Closed,

    /// No response arrived in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The host answered with a JSON-RPC error.
    #[error("Server error [{code}]: {message}")]
    Rpc { code: i32, message: String },

    /// The tool ran but reported failure (`isError: true`).
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// The host sent something that is not a valid answer.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outgoing message could not be framed.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ClientError {
    /// Whether the failure happened below the protocol, i.e. the host could
    /// not be reached or the connection broke.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. }
                | Self::Http(_)
                | Self::Api { .. }
                | Self::Io(_)
                | Self::Closed
                | Self::Config(_)
                | Self::InvalidUrl(_)
        )
    }

    /// JSON-RPC error code, when the host answered with one.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for ClientError {
    fn from(error: JsonRpcError) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// Why one server's toolset could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The transport could not be opened or broke during setup.
    #[error("Could not connect to '{server}': {source}")]
    Connect {
        server: String,
        #[source]
        source: ClientError,
    },

    /// The host rejected or garbled the `initialize` handshake.
    #[error("Handshake with '{server}' failed: {source}")]
    Handshake {
        server: String,
        #[source]
        source: ClientError,
    },

    /// The host's tool catalog could not be read.
    #[error("Could not list tools of '{server}': {source}")]
    Catalog {
        server: String,
        #[source]
        source: ClientError,
    },

    /// Connecting, handshaking and listing did not finish in time.
    #[error("'{server}' did not load within {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    /// The load task itself panicked.
    #[error("Loading '{server}' panicked: {reason}")]
    Panicked { server: String, reason: String },
}

impl LoadError {
    /// Name of the server descriptor that failed.
    pub fn server(&self) -> &str {
        match self {
            Self::Connect { server, .. }
            | Self::Handshake { server, .. }
            | Self::Catalog { server, .. }
            | Self::Timeout { server, .. }
            | Self::Panicked { server, .. } => server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_from_json_rpc() {
        let error = ClientError::from(JsonRpcError::unknown_tool("nope"));

        assert_eq!(error.rpc_code(), Some(-32601));
        assert!(!error.is_transport());
        assert_eq!(error.to_string(), "Server error [-32601]: Unknown tool: nope");
    }

    #[test]
    fn test_transport_classification() {
        assert!(ClientError::Closed.is_transport());
        assert!(ClientError::Api {
            status: 503,
            message: "down".to_string()
        }
        .is_transport());
        assert!(!ClientError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(!ClientError::InvalidResponse("bad".to_string()).is_transport());
    }

    #[test]
    fn test_load_error_names_server() {
        let error = LoadError::Connect {
            server: "files".to_string(),
            source: ClientError::Closed,
        };
        assert_eq!(error.server(), "files");
        assert_eq!(error.to_string(), "Could not connect to 'files': Connection closed");

        let error = LoadError::Timeout {
            server: "slow".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(error.server(), "slow");
        assert!(error.to_string().contains("5s"));
    }
}
