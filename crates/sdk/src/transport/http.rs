//! Streamable-HTTP transport: each message is a POST, answers come back
//! as JSON or as a server-sent event stream.

use super::{Inbox, Transport};
use crate::discovery::ServerDescriptor;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use toolbridge_core::{decode_value, Message};
use tracing::{debug, warn};
use url::Url;

/// Header carrying the session assigned by the host.
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Time allowed for the session teardown request on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP transport for one streamable-HTTP tool host.
pub struct HttpTransport {
    server: String,
    client: Client,
    url: Url,
    session_id: Mutex<Option<String>>,
    inbox_tx: mpsc::Sender<Message>,
    inbox: Inbox,
    closed: CancellationToken,
}

impl HttpTransport {
    /// Prepare a transport for the URL in the descriptor's first argument.
    ///
    /// No request is made until the first `send`.
    pub fn connect(descriptor: &ServerDescriptor, client: Client) -> ClientResult<Self> {
        let raw = descriptor.url().ok_or_else(|| {
            ClientError::Config(format!(
                "server '{}' needs an endpoint URL as its first argument",
                descriptor.name
            ))
        })?;
        let url = Url::parse(raw)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "unsupported URL scheme '{}' for server '{}'",
                url.scheme(),
                descriptor.name
            )));
        }

        let closed = CancellationToken::new();
        let (inbox_tx, inbox) = Inbox::new(closed.clone());
        debug!(server = %descriptor.name, url = %url, "HTTP transport ready");

        Ok(Self {
            server: descriptor.name.clone(),
            client,
            url,
            session_id: Mutex::new(None),
            inbox_tx,
            inbox,
            closed,
        })
    }

    /// Session assigned by the host, once `initialize` has been answered.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    async fn post(&self, message: &Message) -> ClientResult<Response> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(header::ACCEPT, ACCEPT_BOTH)
            .json(message);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(ClientError::Closed),
            response = request.send() => Ok(response?),
        }
    }

    async fn enqueue(&self, value: Value) {
        for message in unpack(value) {
            if self.inbox_tx.send(message).await.is_err() {
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: Message) -> ClientResult<()> {
        if self.closed.is_cancelled() {
            return Err(ClientError::Closed);
        }
        debug!(server = %self.server, method = ?message.method(), "POST message");

        let response = self.post(&message).await?;
        let status = response.status();

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if is_event_stream {
            tokio::spawn(read_event_stream(
                self.server.clone(),
                response,
                self.inbox_tx.clone(),
                self.closed.clone(),
            ));
            return Ok(());
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ClientError::InvalidResponse(format!("response body is not JSON: {}", e)))?;
        self.enqueue(value).await;
        Ok(())
    }

    async fn receive(&self) -> ClientResult<Message> {
        self.inbox.recv().await
    }

    async fn close(&self) -> ClientResult<()> {
        self.closed.cancel();

        let Some(session) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let teardown = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, &session)
            .timeout(CLOSE_TIMEOUT)
            .send()
            .await;
        match teardown {
            Ok(response) => {
                debug!(server = %self.server, status = %response.status(), "Session ended")
            }
            Err(e) => debug!(server = %self.server, error = %e, "Session teardown failed"),
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Split a JSON body into messages; batches arrive as arrays.
fn unpack(value: Value) -> Vec<Message> {
    let values = match value {
        Value::Array(values) => values,
        single => vec![single],
    };

    values
        .into_iter()
        .filter_map(|value| match decode_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable message in response body");
                None
            }
        })
        .collect()
}

async fn read_event_stream(
    server: String,
    response: Response,
    inbox: mpsc::Sender<Message>,
    closed: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut parser = EventParser::default();

    loop {
        let chunk = tokio::select! {
            _ = closed.cancelled() => return,
            chunk = body.next() => chunk,
        };
        let (data, done) = match chunk {
            Some(Ok(bytes)) => (parser.push(&bytes), false),
            Some(Err(e)) => {
                debug!(server = %server, error = %e, "Event stream failed");
                break;
            }
            None => (parser.finish(), true),
        };

        for payload in data {
            match serde_json::from_str::<Value>(&payload) {
                Ok(value) => {
                    for message in unpack(value) {
                        if inbox.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => debug!(server = %server, error = %e, "Skipping non-JSON event"),
            }
        }

        if done {
            break;
        }
    }

    debug!(server = %server, "Event stream ended");
}

/// Incremental parser for `text/event-stream` bodies, yielding the joined
/// `data:` lines of each complete event.
#[derive(Debug, Default)]
struct EventParser {
    buffer: Vec<u8>,
}

impl EventParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_event_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = event_data(&raw[..end]) {
                events.push(data);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    fn finish(&mut self) -> Vec<String> {
        let raw = std::mem::take(&mut self.buffer);
        event_data(&raw).into_iter().collect()
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn event_data(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolbridge_core::{JsonRpcNotification, JsonRpcRequest, RequestId};
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        let descriptor = ServerDescriptor::http("mock", format!("{}/mcp", server.uri()));
        HttpTransport::connect(&descriptor, Client::new()).unwrap()
    }

    fn request(id: i64, method: &str) -> Message {
        JsonRpcRequest::new(id, method, None).into()
    }

    #[test]
    fn test_connect_rejects_bad_urls() {
        let missing = ServerDescriptor {
            name: "empty".to_string(),
            transport: crate::discovery::TransportKind::HttpStream,
            command: "streamable_http".to_string(),
            args: vec![],
        };
        assert!(matches!(
            HttpTransport::connect(&missing, Client::new()),
            Err(ClientError::Config(_))
        ));

        let garbage = ServerDescriptor::http("bad", "not a url");
        assert!(matches!(
            HttpTransport::connect(&garbage, Client::new()),
            Err(ClientError::InvalidUrl(_))
        ));

        let ftp = ServerDescriptor::http("ftp", "ftp://example.com/mcp");
        assert!(matches!(
            HttpTransport::connect(&ftp, Client::new()),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_json_response_lands_in_inbox() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": {"tools": []}
            })))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.send(request(1, "tools/list")).await.unwrap();

        match transport.receive().await.unwrap() {
            Message::Response(response) => {
                assert_eq!(response.id, Some(RequestId::Number(1)));
                assert_eq!(response.result, Some(json!({"tools": []})));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_body_is_unpacked() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}},
                {"jsonrpc": "2.0", "id": 2, "result": {}}
            ])))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.send(request(2, "ping")).await.unwrap();

        assert!(matches!(transport.receive().await.unwrap(), Message::Notification(_)));
        assert!(matches!(transport.receive().await.unwrap(), Message::Response(_)));
    }

    #[tokio::test]
    async fn test_event_stream_response() {
        let server = MockServer::start().await;
        let body = concat!(
            ": keep-alive\n\n",
            "event: message\r\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":5,\r\n",
            "data: \"result\":{\"ok\":true}}\r\n\r\n",
        );

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.send(request(5, "ping")).await.unwrap();

        match transport.receive().await.unwrap() {
            Message::Response(response) => {
                assert_eq!(response.id, Some(RequestId::Number(5)));
                assert_eq!(response.result, Some(json!({"ok": true})));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepted_adds_nothing() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport
            .send(JsonRpcNotification::new("notifications/initialized", None).into())
            .await
            .unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), transport.receive()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_error_status_is_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        match transport.send(request(1, "ping")).await {
            Err(ClientError::Api { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_id_is_echoed_and_released() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, "session-42")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "ping"})))
            .and(header_eq(SESSION_HEADER, "session-42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 2, "result": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(header_eq(SESSION_HEADER, "session-42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport.send(request(1, "initialize")).await.unwrap();
        assert_eq!(transport.session_id().await.as_deref(), Some("session-42"));

        transport.send(request(2, "ping")).await.unwrap();
        transport.receive().await.unwrap();
        transport.receive().await.unwrap();

        transport.close().await.unwrap();
        assert!(matches!(transport.receive().await, Err(ClientError::Closed)));
        assert!(matches!(transport.send(request(3, "ping")).await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_slow_host_hits_request_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let transport = std::sync::Arc::new(transport_for(&server));
        let peer = crate::peer::McpPeer::new("mock", transport, Duration::from_millis(200));

        let started = std::time::Instant::now();
        let outcome = peer.ping().await;
        assert!(matches!(outcome, Err(ClientError::Timeout(_))), "got {:?}", outcome);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_event_parser_handles_split_chunks() {
        let mut parser = EventParser::default();

        assert!(parser.push(b"data: {\"a\":").is_empty());
        assert_eq!(parser.push(b"1}\n\ndata: tail"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(parser.finish(), vec!["tail".to_string()]);
        assert!(parser.finish().is_empty());
    }
}
