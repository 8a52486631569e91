//! Request/response correlation over a transport.

use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolbridge_core::{
    methods, Arguments, CallToolParams, CallToolResult, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, Message, RequestId, ToolDescriptor, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

/// Upper bound on `tools/list` pages followed before giving up.
const MAX_CATALOG_PAGES: usize = 64;

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// Client side of one MCP connection.
///
/// Requests may be issued concurrently; a background dispatcher routes each
/// response to the request with the same id, whatever order they arrive in.
pub struct McpPeer {
    server: String,
    transport: Arc<dyn Transport>,
    pending: Pending,
    next_id: AtomicI64,
    request_timeout: Duration,
    closed: CancellationToken,
    dispatcher: JoinHandle<()>,
    server_info: OnceLock<InitializeResult>,
}

impl McpPeer {
    /// Start dispatching messages from `transport`. Must be called inside a
    /// tokio runtime.
    pub fn new(
        server: impl Into<String>,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Self {
        let server = server.into();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch(
            server.clone(),
            transport.clone(),
            pending.clone(),
            closed.clone(),
        ));

        Self {
            server,
            transport,
            pending,
            next_id: AtomicI64::new(1),
            request_timeout,
            closed,
            dispatcher,
            server_info: OnceLock::new(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Handshake result, once `initialize` has succeeded.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The dispatcher marks the peer closed before failing pending
        // requests, so a request registered after that is caught here.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Closed);
        }

        debug!(server = %self.server, method = %method, id = %id, "Sending request");
        let request = JsonRpcRequest::new(id.clone(), method, params);
        // Over HTTP the reply arrives inside `send`, so the timeout covers both.
        let exchange = async {
            self.transport.send(request.into()).await?;
            rx.await.map_err(|_| ClientError::Closed)
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(Ok(response)) => Ok(response.into_result()?),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(server = %self.server, method = %method, id = %id, "Request timed out");
                Err(ClientError::Timeout(self.request_timeout))
            }
        }
    }

    /// Send a notification; nothing comes back.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.transport
            .send(JsonRpcNotification::new(method, params).into())
            .await
    }

    /// Run the `initialize` handshake and confirm it.
    pub async fn initialize(&self, client_info: &ClientInfo) -> ClientResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: client_info.clone(),
        };

        let value = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("initialize result: {}", e)))?;

        self.notify(methods::INITIALIZED, None).await?;

        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %self.server,
                offered = PROTOCOL_VERSION,
                accepted = %result.protocol_version,
                "Host answered with a different protocol version"
            );
        }
        info!(
            server = %self.server,
            host = %result.server_info.name,
            version = %result.server_info.version,
            "Handshake complete"
        );

        let _ = self.server_info.set(result.clone());
        Ok(result)
    }

    /// Fetch the host's full tool catalog, following pagination cursors.
    pub async fn list_tools(&self) -> ClientResult<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CATALOG_PAGES {
            let params = cursor.take().map(|cursor| json!({ "cursor": cursor }));
            let value = self.request(methods::TOOLS_LIST, params).await?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| ClientError::InvalidResponse(format!("tools/list result: {}", e)))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        Err(ClientError::InvalidResponse(format!(
            "tools/list did not finish within {} pages",
            MAX_CATALOG_PAGES
        )))
    }

    /// Invoke a tool by its name on this host.
    pub async fn call_tool(&self, name: &str, arguments: Arguments) -> ClientResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let value = self
            .request(methods::TOOLS_CALL, Some(serde_json::to_value(params)?))
            .await?;

        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(format!("tools/call result: {}", e)))
    }

    pub async fn ping(&self) -> ClientResult<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// Stop dispatching and close the transport. Pending requests fail with
    /// [`ClientError::Closed`].
    pub async fn close(&self) -> ClientResult<()> {
        self.closed.cancel();
        self.pending.lock().await.clear();
        self.transport.close().await
    }
}

impl Drop for McpPeer {
    fn drop(&mut self) {
        self.closed.cancel();
        self.dispatcher.abort();
    }
}

async fn dispatch(
    server: String,
    transport: Arc<dyn Transport>,
    pending: Pending,
    closed: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = transport.receive() => message,
        };

        match message {
            Ok(Message::Response(response)) => {
                let Some(id) = response.id.clone() else {
                    warn!(server = %server, error = ?response.error, "Response without id");
                    continue;
                };
                match pending.lock().await.remove(&id) {
                    // The requester may have timed out in the meantime.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => warn!(server = %server, id = %id, "Response to unknown request"),
                }
            }
            Ok(Message::Request(request)) => {
                let response = if request.method == methods::PING {
                    JsonRpcResponse::success(request.id, json!({}))
                } else {
                    debug!(server = %server, method = %request.method, "Rejecting host request");
                    JsonRpcResponse::error(
                        Some(request.id),
                        JsonRpcError::method_not_found(&request.method),
                    )
                };
                if let Err(e) = transport.send(response.into()).await {
                    debug!(server = %server, error = %e, "Failed to answer host request");
                }
            }
            Ok(Message::Notification(notification)) => {
                debug!(server = %server, method = %notification.method, "Host notification");
            }
            Err(e) => {
                debug!(server = %server, error = %e, "Transport ended");
                break;
            }
        }
    }

    closed.cancel();
    // Dropping the senders fails every waiting request with `Closed`.
    pending.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use toolbridge_core::{decode, serialize};

    /// Peer wired to the far end of an in-memory pipe.
    fn peer_with_remote(timeout: Duration) -> (Arc<McpPeer>, DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        let (read_half, write_half) = split(local);
        let transport = Arc::new(StreamTransport::new("test", read_half, write_half));
        (Arc::new(McpPeer::new("test", transport, timeout)), remote)
    }

    async fn read_request(lines: &mut tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>) -> JsonRpcRequest {
        let line = lines.next_line().await.unwrap().unwrap();
        match decode(&line).unwrap() {
            Message::Request(request) => request,
            other => panic!("expected request, got {:?}", other),
        }
    }

    async fn write_message(writer: &mut tokio::io::WriteHalf<DuplexStream>, message: Message) {
        let mut frame = serialize(&message).unwrap();
        frame.push('\n');
        writer.write_all(frame.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_correlated() {
        let (peer, remote) = peer_with_remote(Duration::from_secs(5));
        let (remote_read, mut remote_write) = split(remote);

        // Fake host: collect three requests, answer them in reverse order.
        let host = tokio::spawn(async move {
            let mut lines = BufReader::new(remote_read).lines();
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(read_request(&mut lines).await);
            }
            for request in requests.into_iter().rev() {
                let echo = request.params.clone().unwrap_or(Value::Null);
                write_message(&mut remote_write, JsonRpcResponse::success(request.id, echo).into()).await;
            }
        });

        let calls = (0..3).map(|n| {
            let peer = peer.clone();
            async move { peer.request("echo", Some(json!({ "n": n }))).await }
        });
        let results = futures_util::future::join_all(calls).await;

        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!({ "n": n }));
        }
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let (peer, remote) = peer_with_remote(Duration::from_secs(5));
        let (remote_read, mut remote_write) = split(remote);

        tokio::spawn(async move {
            let mut lines = BufReader::new(remote_read).lines();
            let request = read_request(&mut lines).await;
            write_message(
                &mut remote_write,
                JsonRpcResponse::error(Some(request.id), JsonRpcError::unknown_tool("nope")).into(),
            )
            .await;
        });

        let error = peer.call_tool("nope", Arguments::new()).await.unwrap_err();
        match error {
            ClientError::Rpc { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Unknown tool: nope");
            }
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let (peer, _remote) = peer_with_remote(Duration::from_millis(50));

        let error = peer.ping().await.unwrap_err();
        assert!(matches!(error, ClientError::Timeout(_)));
        assert!(peer.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_host_exit_fails_pending_requests() {
        let (peer, remote) = peer_with_remote(Duration::from_secs(5));
        let (remote_read, remote_write) = split(remote);

        tokio::spawn(async move {
            let mut lines = BufReader::new(remote_read).lines();
            let _ = lines.next_line().await;
            drop(remote_write);
            drop(lines);
        });

        let error = peer.ping().await.unwrap_err();
        assert!(matches!(error, ClientError::Closed));
        assert!(peer.is_closed());
        assert!(matches!(peer.ping().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_host_ping_is_answered() {
        let (_peer, remote) = peer_with_remote(Duration::from_secs(5));
        let (remote_read, mut remote_write) = split(remote);

        write_message(&mut remote_write, JsonRpcRequest::new("srv-1", "ping", None).into()).await;
        write_message(&mut remote_write, JsonRpcRequest::new("srv-2", "sampling/createMessage", None).into()).await;

        let mut lines = BufReader::new(remote_read).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first, json!({"jsonrpc": "2.0", "id": "srv-1", "result": {}}));

        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["id"], "srv-2");
        assert_eq!(second["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let (peer, remote) = peer_with_remote(Duration::from_secs(5));
        let (remote_read, mut remote_write) = split(remote);

        tokio::spawn(async move {
            let mut lines = BufReader::new(remote_read).lines();

            let first = read_request(&mut lines).await;
            assert!(first.params.is_none());
            let page = json!({"tools": [{"name": "a", "description": "first"}], "nextCursor": "p2"});
            write_message(&mut remote_write, JsonRpcResponse::success(first.id, page).into()).await;

            let second = read_request(&mut lines).await;
            assert_eq!(second.params, Some(json!({"cursor": "p2"})));
            let page = json!({"tools": [{"name": "b", "description": "second"}]});
            write_message(&mut remote_write, JsonRpcResponse::success(second.id, page).into()).await;
        });

        let tools = peer.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(tools[0].input_schema["type"], "object");
    }

    #[tokio::test]
    async fn test_close_fails_later_requests() {
        let (peer, _remote) = peer_with_remote(Duration::from_secs(5));

        peer.close().await.unwrap();
        assert!(matches!(peer.ping().await, Err(ClientError::Closed)));
        assert!(matches!(peer.notify("x", None).await, Err(ClientError::Closed)));
    }
}
