//! Transport seam for the stream manager.
//!
//! The manager only ever sees the [`StreamTransport`] / [`StreamSink`] /
//! [`StreamSource`] traits, so reconnect, heartbeat, and subscription logic
//! run identically against a live WebSocket or a scripted test double.

use crate::error::StreamError;
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::debug;
use url::Url;

/// Inbound transport-level message, already stripped of frame details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Ping,
    Pong,
    /// Binary or other frames this engine does not consume.
    Other,
}

/// Write half of a connection.
#[async_trait]
pub trait StreamSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError>;
    async fn send_ping(&mut self) -> Result<(), StreamError>;
}

/// Read half of a connection. `None` means the stream ended.
#[async_trait]
pub trait StreamSource: Send {
    async fn next_message(&mut self) -> Option<Result<InboundMessage, StreamError>>;
}

/// Connection factory. Called once per (re)connect attempt.
#[async_trait]
pub trait StreamTransport: Send {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), StreamError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport against a live endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), StreamError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|error| StreamError::Connect(error.to_string()))?;
        debug!(url = %self.url, "websocket connected");

        let (write, read) = ws_stream.split();
        Ok((
            Box::new(WsSink { inner: write }),
            Box::new(WsSource { inner: read }),
        ))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl StreamSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| StreamError::Transport(error.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), StreamError> {
        self.inner
            .send(Message::Ping(vec![].into()))
            .await
            .map_err(|error| StreamError::Transport(error.to_string()))
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl StreamSource for WsSource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage, StreamError>> {
        match self.inner.next().await? {
            Ok(Message::Text(text)) => Some(Ok(InboundMessage::Text(text.to_string()))),
            // Tungstenite answers pings automatically; both directions still
            // count as inbound traffic for the liveness deadline.
            Ok(Message::Ping(_)) => Some(Ok(InboundMessage::Ping)),
            Ok(Message::Pong(_)) => Some(Ok(InboundMessage::Pong)),
            Ok(Message::Close(_)) => Some(Err(StreamError::Closed)),
            Ok(_) => Some(Ok(InboundMessage::Other)),
            Err(error) => Some(Err(StreamError::Transport(error.to_string()))),
        }
    }
}
