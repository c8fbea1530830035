//! Channel-backed transport mock for exercising the device link without a
//! backend.
//!
//! Each prepared transport comes with a [`MockRemote`] playing the part of
//! the server: it pushes inbound events, observes everything the client
//! sent, and ends the connection by dropping its sender. The
//! [`MockConnector`] hands out prepared transports in order, so reconnect
//! sequences can be scripted as a queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{LinkError, Result};
use crate::transport::{Connector, MessageTransport, TransportEvent};

/// Something the client wrote to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text(String),
    Ping,
}

/// Test-side handle to one mock connection.
pub struct MockRemote {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    sent: mpsc::UnboundedReceiver<SentMessage>,
}

impl MockRemote {
    /// Push a text message toward the client.
    pub fn push_text(&self, text: impl Into<String>) {
        if let Some(events) = &self.events {
            let _ = events.send(TransportEvent::Text(text.into()));
        }
    }

    /// Push a JSON value toward the client.
    pub fn push_json(&self, value: &serde_json::Value) {
        self.push_text(value.to_string());
    }

    /// Simulate the server closing the connection.
    pub fn close(&mut self) {
        self.events = None;
    }

    /// Next message the client sent, in order, pings included.
    pub async fn next_sent(&mut self) -> Option<SentMessage> {
        self.sent.recv().await
    }

    /// Next *text* message the client sent, parsed as JSON.
    pub async fn next_sent_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.sent.recv().await? {
                SentMessage::Text(text) => {
                    return serde_json::from_str(&text).ok();
                }
                SentMessage::Ping => continue,
            }
        }
    }

    /// Whatever the client sent so far without waiting.
    pub fn drain_sent(&mut self) -> Vec<SentMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.sent.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// Scripted [`MessageTransport`] counterpart of a [`MockRemote`].
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<SentMessage>,
    auto_pong: bool,
    pong_pending: bool,
}

impl MessageTransport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(SentMessage::Text(text))
            .map_err(|_| LinkError::Transport("mock remote dropped".to_string()))
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.outbound
            .send(SentMessage::Ping)
            .map_err(|_| LinkError::Transport("mock remote dropped".to_string()))?;
        if self.auto_pong {
            self.pong_pending = true;
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<TransportEvent>> {
        if self.pong_pending {
            self.pong_pending = false;
            return Some(Ok(TransportEvent::Pong));
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Hands out prepared [`MockTransport`]s, one per connect call.
#[derive(Clone, Default)]
pub struct MockConnector {
    transports: Arc<Mutex<VecDeque<MockTransport>>>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one connection; the returned remote scripts and observes it.
    ///
    /// With `auto_pong` the transport answers every ping by itself, which
    /// is what a healthy backend does.
    pub fn prepare(&self, auto_pong: bool) -> MockRemote {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();

        self.transports
            .lock()
            .expect("mock transport queue poisoned")
            .push_back(MockTransport {
                inbound: event_rx,
                outbound: sent_tx,
                auto_pong,
                pong_pending: false,
            });

        MockRemote {
            events: Some(event_tx),
            sent: sent_rx,
        }
    }

    /// How many times the client connected (initial + reconnects).
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport> {
        let transport = self
            .transports
            .lock()
            .expect("mock transport queue poisoned")
            .pop_front()
            .ok_or_else(|| LinkError::ConnectFailed("no scripted transport left".to_string()))?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(transport)
    }
}
