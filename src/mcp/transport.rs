//! Line-delimited JSON-RPC over stdin/stdout.
//!
//! The HTTP transport lives in [`crate::http`]; it terminates requests
//! itself instead of exposing message channels.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::Result;
use crate::mcp::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// A message that can be sent or received.
#[derive(Debug, Clone)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl From<JsonRpcMessage> for Message {
    fn from(message: JsonRpcMessage) -> Self {
        match message {
            JsonRpcMessage::Request(r) => Message::Request(r),
            JsonRpcMessage::Response(r) => Message::Response(r),
            JsonRpcMessage::Notification(n) => Message::Notification(n),
        }
    }
}

/// Channel-based message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the transport, returning the incoming and outgoing channels.
    async fn start(&mut self) -> Result<(mpsc::Receiver<Message>, mpsc::Sender<Message>)>;

    async fn stop(&mut self) -> Result<()>;
}

/// Stdio transport, generic over its streams so tests can use pipes.
pub struct StdioTransport<R = tokio::io::Stdin, W = tokio::io::Stdout> {
    reader: Option<R>,
    writer: Option<W>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self::with_streams(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W> {
    pub fn with_streams(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
        }
    }
}

fn encode(msg: &Message) -> serde_json::Result<String> {
    match msg {
        Message::Request(req) => serde_json::to_string(req),
        Message::Response(res) => serde_json::to_string(res),
        Message::Notification(notif) => serde_json::to_string(notif),
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync + 'static,
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn start(&mut self) -> Result<(mpsc::Receiver<Message>, mpsc::Sender<Message>)> {
        let (reader, mut writer) = match (self.reader.take(), self.writer.take()) {
            (Some(r), Some(w)) => (r, w),
            _ => {
                return Err(crate::error::Error::Internal(
                    "stdio transport already started".to_string(),
                ))
            }
        };

        let (incoming_tx, incoming_rx) = mpsc::channel::<Message>(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(100);

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(None) => {
                        debug!("EOF on stdin, stopping transport");
                        break;
                    }
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!("Received: {}", trimmed);

                        match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                            Ok(msg) => {
                                if incoming_tx.send(msg.into()).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Ignoring unparsable message: {}", e),
                        }
                    }
                    Err(e) => {
                        error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let line = match encode(&msg) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Error serializing message: {}", e);
                        continue;
                    }
                };
                trace!("Sending: {}", line);

                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    error!("Error writing to stdout: {}", e);
                    break;
                }
            }
        });

        Ok((incoming_rx, outgoing_tx))
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
