//! Transport layer: one bidirectional JSON-RPC channel per tool host.

pub mod http;
pub mod stream;

pub use http::HttpTransport;
pub use stream::{StdioTransport, StreamTransport};

use crate::discovery::{ServerDescriptor, TransportKind};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use toolbridge_core::Message;

/// Capacity of a transport's inbound queue.
const INBOX_CAPACITY: usize = 128;

/// A message channel to one tool host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message.
    async fn send(&self, message: Message) -> ClientResult<()>;

    /// Wait for the next inbound message.
    ///
    /// Fails with [`ClientError::Closed`] once the transport is closed or
    /// the host goes away.
    async fn receive(&self) -> ClientResult<Message>;

    /// Close the channel and release the host.
    async fn close(&self) -> ClientResult<()>;
}

/// Opens transports for server descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor) -> ClientResult<Arc<dyn Transport>>;
}

/// Connector choosing the transport from the descriptor's kind.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client for HTTP hosts.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> ClientResult<Arc<dyn Transport>> {
        match descriptor.transport {
            TransportKind::StdioProcess => Ok(Arc::new(StdioTransport::spawn(descriptor)?)),
            TransportKind::HttpStream => Ok(Arc::new(HttpTransport::connect(
                descriptor,
                self.http.clone(),
            )?)),
        }
    }
}

/// Inbound queue shared by the transports: filled by a background task,
/// drained by `receive`, and cut short by the close token.
pub(crate) struct Inbox {
    rx: Mutex<mpsc::Receiver<Message>>,
    closed: CancellationToken,
}

impl Inbox {
    pub(crate) fn new(closed: CancellationToken) -> (mpsc::Sender<Message>, Self) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        (
            tx,
            Self {
                rx: Mutex::new(rx),
                closed,
            },
        )
    }

    pub(crate) async fn recv(&self) -> ClientResult<Message> {
        let mut rx = tokio::select! {
            _ = self.closed.cancelled() => return Err(ClientError::Closed),
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(ClientError::Closed),
            message = rx.recv() => message.ok_or(ClientError::Closed),
        }
    }
}
