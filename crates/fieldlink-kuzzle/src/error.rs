use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on the device link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No transport is open.
    #[error("Not connected to Kuzzle")]
    NotConnected,

    /// Opening the websocket failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The backend closed the connection.
    #[error("Connection closed by Kuzzle")]
    ConnectionClosed,

    /// The liveness probe went unanswered.
    #[error("No PONG from Kuzzle within {0:?}")]
    PongTimeout(Duration),

    /// A correlated request id is already pending.
    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    /// Websocket-level send/receive failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The actor's command channel is gone (link task ended).
    #[error("Device link is no longer running")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, LinkError>;
