//! Message-stream transport abstraction for the device link.
//!
//! The run loop only ever sees [`TransportEvent`]s: a text message, or the
//! acknowledgement of a liveness probe. `None` from
//! [`MessageTransport::next_event`] means the connection is gone. The
//! [`Connector`] re-opens transports, which is what makes fixed-backoff
//! reconnection possible without the client knowing websocket details.

#![allow(async_fn_in_trait)]

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};

/// One inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete text message.
    Text(String),
    /// Acknowledgement of a previously sent ping.
    Pong,
}

/// A connected message stream.
pub trait MessageTransport {
    /// Send one text message.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Send a liveness probe.
    async fn send_ping(&mut self) -> Result<()>;

    /// Await the next inbound event; `None` once the connection is closed.
    async fn next_event(&mut self) -> Option<Result<TransportEvent>>;

    /// Close the stream. Best effort; errors are swallowed.
    async fn close(&mut self);
}

/// Opens (and re-opens) message streams to one endpoint.
pub trait Connector {
    type Transport: MessageTransport;

    async fn connect(&mut self) -> Result<Self::Transport>;
}

/// Websocket connector for `ws://host:port`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
        }
    }

    /// Use a preformed URL (`ws://` or `wss://`).
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&mut self) -> Result<WsTransport> {
        debug!(url = %self.url, "<Connecting...>");
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
        info!(url = %self.url, "<Connected>");
        Ok(WsTransport { inner: stream })
    }
}

/// [`MessageTransport`] over a tungstenite websocket stream.
pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MessageTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.inner
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<Result<TransportEvent>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(TransportEvent::Text(text))),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(TransportEvent::Text(
                        String::from_utf8_lossy(&bytes).into_owned(),
                    )));
                }
                Ok(Message::Pong(_)) => return Some(Ok(TransportEvent::Pong)),
                // tungstenite answers pings on the next flush by itself
                Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    warn!(?frame, "Websocket closed by peer");
                    return None;
                }
                Err(e) => return Some(Err(LinkError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
