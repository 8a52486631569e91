// MCP protocol server: handshake state machine, request routing and the
// sequential read/dispatch/write loop

use crate::tools::{coerce_text, RegistryError, ToolRegistry};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use toolbridge_core::{
    decode, is_blank, methods, DecodeError, serialize, CallToolParams, CallToolResult, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, Message, ServerCapabilities, ServerInfo, ToolsCapability, PROTOCOL_VERSION,
};

/// Longest line accepted from a client; longer lines are dropped.
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Ready,
}

/// A tool host speaking JSON-RPC over one byte stream.
///
/// Messages are handled strictly one at a time: a slow tool call holds up
/// everything queued behind it on the same connection.
pub struct McpServer {
    info: ServerInfo,
    registry: Arc<ToolRegistry>,
    state: ServerState,
    client_acknowledged: bool,
    require_initialize: bool,
}

impl McpServer {
    pub fn new(info: ServerInfo, registry: ToolRegistry) -> Self {
        Self {
            info,
            registry: Arc::new(registry),
            state: ServerState::Uninitialized,
            client_acknowledged: false,
            require_initialize: false,
        }
    }

    /// Reject `tools/list` and `tools/call` until `initialize` has been seen.
    pub fn require_initialize(mut self, required: bool) -> Self {
        self.require_initialize = required;
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Whether the client sent `notifications/initialized`.
    pub fn client_acknowledged(&self) -> bool {
        self.client_acknowledged
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve process stdin/stdout until stdin closes.
    pub async fn serve_stdio(&mut self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until the input stream ends.
    ///
    /// Undecodable and oversized lines are logged and skipped; only a
    /// failure of the stream itself ends the loop early.
    pub async fn serve<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            server = %self.info.name,
            version = %self.info.version,
            tools = ?self.registry.names(),
            "Serving"
        );

        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        let mut resyncing = false;

        loop {
            let line = match lines.next().await {
                Some(Ok(line)) => {
                    resyncing = false;
                    line
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(max = MAX_LINE_LENGTH, "Dropping oversized line");
                    resyncing = true;
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::error!(error = %e, "Skipping line that is not valid UTF-8");
                    resyncing = true;
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    return Err(e).context("failed to read from input stream");
                }
                // The framed reader yields one None after a codec error.
                None if resyncing => {
                    resyncing = false;
                    continue;
                }
                None => break,
            };

            if is_blank(&line) {
                continue;
            }
            tracing::debug!(line = %line, "Received");

            let response = match decode(&line) {
                Ok(message) => self.handle_message(message).await,
                Err(DecodeError::InvalidRequest { id, reason }) => {
                    tracing::warn!(id = %id, reason = %reason, "Invalid request");
                    Some(JsonRpcResponse::error(Some(id), JsonRpcError::invalid_request(reason)))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Skipping undecodable line");
                    None
                }
            };
            let Some(response) = response else {
                continue;
            };

            let frame = match serialize(&Message::Response(response)) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "Dropping response that failed to encode");
                    continue;
                }
            };
            tracing::debug!(line = %frame, "Sending");
            sink.send(frame)
                .await
                .context("failed to write to output stream")?;
        }

        tracing::info!(server = %self.info.name, "Input stream closed, shutting down");
        Ok(())
    }

    /// Process one decoded message, returning the response to send, if any.
    pub async fn handle_message(&mut self, message: Message) -> Option<JsonRpcResponse> {
        match message {
            Message::Request(request) => Some(self.handle_request(request).await),
            Message::Notification(notification) => {
                self.handle_notification(notification);
                None
            }
            Message::Response(response) => {
                tracing::warn!(id = ?response.id, "Ignoring response sent to a server");
                None
            }
        }
    }

    async fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        tracing::debug!(method = %method, id = %id, "Handling request");

        let outcome = match method.as_str() {
            methods::INITIALIZE => self.initialize(params),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => match self.ensure_ready() {
                Ok(()) => self.list_tools(),
                Err(e) => Err(e),
            },
            methods::TOOLS_CALL => match self.ensure_ready() {
                Ok(()) => self.call_tool(params).await,
                Err(e) => Err(e),
            },
            other => {
                tracing::warn!(method = %other, "Unknown method");
                Err(JsonRpcError::method_not_found(other))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(Some(id), error),
        }
    }

    fn handle_notification(&mut self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => {
                self.client_acknowledged = true;
                tracing::info!("Client confirmed initialization");
            }
            other => tracing::debug!(method = %other, "Ignoring notification"),
        }
    }

    fn ensure_ready(&self) -> Result<(), JsonRpcError> {
        if self.require_initialize && self.state != ServerState::Ready {
            return Err(JsonRpcError::not_initialized());
        }
        Ok(())
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        if let Some(Ok(params)) = params.map(serde_json::from_value::<InitializeParams>) {
            tracing::info!(
                client = %params.client_info.name,
                client_version = %params.client_info.version,
                protocol = %params.protocol_version,
                "Initialize requested"
            );
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: self.info.clone(),
        };
        let value = to_result_value(&result)?;

        if self.state == ServerState::Uninitialized {
            tracing::info!("Initialized successfully");
        }
        self.state = ServerState::Ready;
        Ok(value)
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        to_result_value(&ListToolsResult {
            tools: self.registry.list(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing tools/call params"))?;
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("invalid tools/call params: {}", e)))?;

        tracing::info!(tool = %params.name, arguments = ?params.arguments, "Calling tool");

        match self.registry.invoke(&params.name, params.arguments).await {
            Ok(value) => {
                tracing::info!(tool = %params.name, "Tool executed successfully");
                to_result_value(&CallToolResult::text(coerce_text(&value)))
            }
            Err(RegistryError::NotFound(name)) => {
                tracing::warn!(tool = %name, "Unknown tool");
                Err(JsonRpcError::unknown_tool(&name))
            }
            Err(e) => {
                tracing::error!(tool = %params.name, error = %e, "Tool execution error");
                let mut message = e.to_string();
                if message.trim().is_empty() {
                    message = format!("Tool '{}' failed", params.name);
                }
                Err(JsonRpcError::internal_error(message))
            }
        }
    }
}

fn to_result_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
