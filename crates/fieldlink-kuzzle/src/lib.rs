//! Persistent device-link client to a Kuzzle real-time backend.
//!
//! One [`DeviceLink`] owns one websocket connection and runs the protocol
//! state machine: connect, reconcile the device-info record, then loop over
//! inbound messages with heartbeat keepalive and fixed-backoff reconnect.
//! Everything that touches the socket or the pending-request table happens
//! inside that single actor loop; other execution contexts (the NFC worker
//! thread, sensor samplers) talk to it through a clonable [`LinkHandle`].
//!
//! # Architecture
//!
//! ```text
//! sensors / NFC thread ──LinkHandle──┐
//!                                    ▼
//!                     DeviceLink run loop ──Connector──> ws://host:port
//!                        │        │
//!                        │        └─> RequestCorrelator (pending queries)
//!                        └─> state-changed callback (subscriptions)
//! ```

pub mod client;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod mock;
pub mod server_info;
pub mod transport;

pub use client::{ConnectedCallback, DeviceLink, LinkConfig, LinkHandle, StateCallback};
pub use correlator::RequestCorrelator;
pub use envelope::{DeviceIdentity, Query, ResponseEnvelope, StateChange};
pub use error::{LinkError, Result};
pub use server_info::{ServerInfo, server_info};
pub use transport::{Connector, MessageTransport, TransportEvent};
