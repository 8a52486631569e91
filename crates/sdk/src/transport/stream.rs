//! Line-delimited transports: any byte stream pair, and child processes.

use super::{Inbox, Transport};
use crate::discovery::ServerDescriptor;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use toolbridge_core::{decode, is_blank, serialize, Message};
use tracing::{debug, info, warn};

/// Longest line accepted from a host; longer lines are dropped.
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// How long a host gets to exit after its stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// JSON-RPC over a pair of byte streams, one message per line.
///
/// A background task reads and decodes lines into an inbox; anything that
/// does not decode as a JSON-RPC message is logged and skipped.
pub struct StreamTransport {
    writer: Mutex<Option<FramedWrite<BoxedWriter, LinesCodec>>>,
    inbox: Inbox,
    closed: CancellationToken,
}

impl StreamTransport {
    /// Wrap a reader/writer pair. Must be called inside a tokio runtime.
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let closed = CancellationToken::new();
        let (tx, inbox) = Inbox::new(closed.clone());
        tokio::spawn(read_lines(label.into(), reader, tx, closed.clone()));

        let writer: BoxedWriter = Box::new(writer);
        Self {
            writer: Mutex::new(Some(FramedWrite::new(writer, LinesCodec::new()))),
            inbox,
            closed,
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, message: Message) -> ClientResult<()> {
        if self.closed.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let frame = serialize(&message)?;

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(ClientError::Closed)?;
        sink.send(frame).await.map_err(codec_error)
    }

    async fn receive(&self) -> ClientResult<Message> {
        self.inbox.recv().await
    }

    async fn close(&self) -> ClientResult<()> {
        self.closed.cancel();
        // Dropping the writer closes the stream, which a host reads as EOF.
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = SinkExt::<String>::close(&mut writer).await {
                debug!(error = %e, "Error while closing writer");
            }
        }
        Ok(())
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn codec_error(error: LinesCodecError) -> ClientError {
    match error {
        LinesCodecError::Io(e) => ClientError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => {
            ClientError::InvalidResponse("line exceeds maximum length".to_string())
        }
    }
}

async fn read_lines<R>(
    label: String,
    reader: R,
    inbox: mpsc::Sender<Message>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut resyncing = false;

    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => {
                resyncing = false;
                line
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(server = %label, max = MAX_LINE_LENGTH, "Dropping oversized line");
                resyncing = true;
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(server = %label, error = %e, "Skipping line that is not valid UTF-8");
                resyncing = true;
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!(server = %label, error = %e, "Read failed");
                break;
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

        match decode(&line) {
            Ok(message) => {
                if inbox.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(server = %label, error = %e, line = %line, "Skipping non-protocol output"),
        }
    }

    debug!(server = %label, "Reader stopped");
}

/// A tool host running as a child process, spoken to over its stdio.
pub struct StdioTransport {
    server: String,
    stream: StreamTransport,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Launch `command args...` with piped stdio.
    ///
    /// The child is killed if the transport is dropped without `close`.
    pub fn spawn(descriptor: &ServerDescriptor) -> ClientResult<Self> {
        let spawn_error = |reason: String| ClientError::Spawn {
            command: descriptor.command.clone(),
            reason,
        };

        let mut child = Command::new(&descriptor.command)
            .args(&descriptor.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(spawn_error("child stdio was not captured".to_string()));
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(descriptor.name.clone(), stderr));
        }

        info!(
            server = %descriptor.name,
            command = %descriptor.command,
            pid = ?child.id(),
            "Spawned tool host"
        );

        Ok(Self {
            server: descriptor.name.clone(),
            stream: StreamTransport::new(descriptor.name.clone(), stdout, stdin),
            child: Mutex::new(Some(child)),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Message) -> ClientResult<()> {
        self.stream.send(message).await
    }

    async fn receive(&self) -> ClientResult<Message> {
        self.stream.receive().await
    }

    async fn close(&self) -> ClientResult<()> {
        self.stream.close().await?;

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(server = %self.server, status = %status, "Tool host exited"),
            Ok(Err(e)) => warn!(server = %self.server, error = %e, "Failed to wait for tool host"),
            Err(_) => {
                warn!(server = %self.server, "Tool host did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

async fn forward_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %server, "{}", line);
    }
}
