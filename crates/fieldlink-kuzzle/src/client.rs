//! The device-link actor.
//!
//! One [`DeviceLink`] owns one connection, the pending-request table and
//! the connection state; nothing else touches them. Producers on other
//! tasks or threads hold a [`LinkHandle`] and hand work off as commands
//! consumed by the run loop, so the single shared-resource boundary in the
//! system is protected by ownership rather than locking.
//!
//! Run-loop behaviour, in order of precedence:
//! - an inbound envelope is dispatched before the next one is read;
//! - no traffic for `idle_timeout` sends a ping and waits `pong_timeout`
//!   for the acknowledgement; silence means the connection is dead and
//!   the loop exits for the supervisor to deal with;
//! - a closed connection drains the correlator (pending continuations are
//!   dropped, by contract), waits a fixed `reconnect_delay`, re-opens the
//!   transport and re-arms the last subscription before resuming.

use fieldlink_core::ConnectionState;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::correlator::RequestCorrelator;
use crate::envelope::{
    self, DeviceIdentity, Query, REQUEST_GET_DEVICE_INFO, ResponseEnvelope, publish_request_id,
};
use crate::error::{LinkError, Result};
use crate::transport::{Connector, MessageTransport, TransportEvent};

use std::time::Duration;

/// Callback invoked with `(state, is_partial)` for remote state changes.
pub type StateCallback = Box<dyn FnMut(Value, bool) + Send>;

/// Callback invoked once the initial connection is up.
pub type ConnectedCallback = Box<dyn FnOnce(&DeviceIdentity) + Send>;

/// Timing knobs of the run loop.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long the run loop waits for traffic before probing liveness.
    pub idle_timeout: Duration,

    /// How long a ping may go unanswered before the connection counts as
    /// dead.
    pub pong_timeout: Duration,

    /// Fixed pause before every reconnect attempt. Not exponential and not
    /// capped; the link is designed to retry in the background forever.
    pub reconnect_delay: Duration,

    /// Capacity of the command channel feeding the actor.
    pub command_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            command_buffer: 32,
        }
    }
}

/// Work handed off to the actor loop.
enum LinkCommand {
    PublishState { state: Value, partial: bool },
    SubscribeState { callback: StateCallback },
    PublishDeviceInfo,
    Query {
        query: Query,
        reply: oneshot::Sender<ResponseEnvelope>,
    },
    Disconnect,
}

/// Clonable producer side of the actor's command channel.
///
/// All methods merely enqueue; the actor performs the actual I/O in its own
/// loop, preserving single-ownership of the socket and correlator.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<LinkCommand>,
}

impl LinkHandle {
    /// Fire-and-forget state publication. Delivery is best effort;
    /// duplicates and reordering must be tolerated by consumers.
    pub async fn publish_state(&self, state: Value, partial: bool) -> Result<()> {
        self.tx
            .send(LinkCommand::PublishState { state, partial })
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }

    /// Blocking variant of [`publish_state`](Self::publish_state) for
    /// producers on plain worker threads, like the NFC polling thread.
    pub fn publish_state_blocking(&self, state: Value, partial: bool) -> Result<()> {
        self.tx
            .blocking_send(LinkCommand::PublishState { state, partial })
            .map_err(|_| LinkError::ChannelClosed)
    }

    /// Register `callback` for remote state changes and subscribe to this
    /// device's state documents. The subscription is re-armed
    /// automatically after every reconnect.
    pub async fn subscribe_state(
        &self,
        callback: impl FnMut(Value, bool) + Send + 'static,
    ) -> Result<()> {
        self.tx
            .send(LinkCommand::SubscribeState {
                callback: Box::new(callback),
            })
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }

    /// Send a correlated query and await its response envelope.
    ///
    /// A missing `requestId` is filled with a fresh UUID. The reply channel
    /// is dropped without an answer when the connection dies first.
    pub async fn query(&self, query: Query) -> Result<ResponseEnvelope> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LinkCommand::Query {
                query,
                reply: reply_tx,
            })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        reply_rx.await.map_err(|_| LinkError::ConnectionClosed)
    }

    /// Ask the actor to close the connection and end its run loop.
    pub async fn disconnect(&self) -> Result<()> {
        self.tx
            .send(LinkCommand::Disconnect)
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }
}

/// What the run loop decided to act on next.
enum LoopEvent {
    Command(Option<LinkCommand>),
    Inbound(Option<Result<TransportEvent>>),
    IdleTimeout,
}

/// Persistent, reconnecting client session for one logical device.
pub struct DeviceLink<C: Connector> {
    connector: C,
    identity: DeviceIdentity,
    config: LinkConfig,
    state: ConnectionState,
    transport: Option<C::Transport>,
    correlator: RequestCorrelator,
    on_state_changed: Option<StateCallback>,
    subscription: Option<Query>,
    own_publish_id: String,
    commands: mpsc::Receiver<LinkCommand>,
    self_tx: mpsc::Sender<LinkCommand>,
}

impl<C: Connector> DeviceLink<C> {
    /// Build a link and the handle feeding it.
    pub fn new(connector: C, identity: DeviceIdentity, config: LinkConfig) -> (Self, LinkHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer);
        let own_publish_id = publish_request_id(&identity.device_uid);
        let link = Self {
            connector,
            identity,
            config,
            state: ConnectionState::Disconnected,
            transport: None,
            correlator: RequestCorrelator::new(),
            on_state_changed: None,
            subscription: None,
            own_publish_id,
            commands: rx,
            self_tx: tx.clone(),
        };
        (link, LinkHandle { tx })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity this link publishes under.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Open the initial connection.
    ///
    /// On success the link is `Connected`, `on_connected` has run, and the
    /// correlated device-info lookup is on the wire. On failure the state
    /// stays `Disconnected` and no retry is attempted; initial-connect
    /// retry policy belongs to the caller.
    pub async fn connect(&mut self, on_connected: Option<ConnectedCallback>) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                error!(error = %e, "Unable to connect to Kuzzle");
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        self.transport = Some(transport);
        self.state = ConnectionState::Connected;

        if let Some(callback) = on_connected {
            callback(&self.identity);
        }

        self.request_device_info().await
    }

    /// Issue the correlated identity lookup; its continuation posts a
    /// `PublishDeviceInfo` command back to this actor when the record is
    /// missing or inactive, making registration self-healing.
    async fn request_device_info(&mut self) -> Result<()> {
        let self_tx = self.self_tx.clone();
        self.correlator.register(
            REQUEST_GET_DEVICE_INFO,
            Box::new(move |response| {
                debug!("device info result");
                if response.device_info_missing_or_inactive() {
                    let _ = self_tx.try_send(LinkCommand::PublishDeviceInfo);
                } else {
                    debug!("Device info record present and active");
                }
            }),
        )?;

        let query = envelope::get_device_info(&self.identity.device_uid);
        self.send_query(&query).await
    }

    async fn send_query(&mut self, query: &Query) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;
        let text = serde_json::to_string(query)?;
        debug!(action = query.action, collection = query.collection, "Posting query");
        transport.send_text(text).await
    }

    /// Drive the session until [`LinkHandle::disconnect`] is called or the
    /// connection is declared dead.
    ///
    /// # Errors
    /// - `LinkError::NotConnected` when called before [`connect`](Self::connect)
    /// - `LinkError::PongTimeout` when a liveness probe goes unanswered
    /// - `LinkError::ConnectFailed` when a reconnect attempt fails
    pub async fn run(&mut self) -> Result<()> {
        if self.transport.is_none() {
            return Err(LinkError::NotConnected);
        }

        loop {
            let idle_timeout = self.config.idle_timeout;
            let event = {
                let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;
                let commands = &mut self.commands;
                tokio::select! {
                    command = commands.recv() => LoopEvent::Command(command),
                    inbound = tokio::time::timeout(idle_timeout, transport.next_event()) => {
                        match inbound {
                            Ok(event) => LoopEvent::Inbound(event),
                            Err(_) => LoopEvent::IdleTimeout,
                        }
                    }
                }
            };

            match event {
                LoopEvent::Command(None) | LoopEvent::Command(Some(LinkCommand::Disconnect)) => {
                    info!("Disconnecting from Kuzzle");
                    if let Some(mut transport) = self.transport.take() {
                        transport.close().await;
                    }
                    let dropped = self.correlator.drain_and_drop();
                    if dropped > 0 {
                        warn!(dropped, "Pending requests dropped on disconnect");
                    }
                    self.state = ConnectionState::Disconnected;
                    return Ok(());
                }
                LoopEvent::Command(Some(command)) => self.handle_command(command).await,
                LoopEvent::Inbound(Some(Ok(TransportEvent::Text(text)))) => {
                    debug!(device_type = %self.identity.device_type, "<<Received data from Kuzzle...>>");
                    self.handle_message(&text);
                }
                // A pong outside a probe window is harmless
                LoopEvent::Inbound(Some(Ok(TransportEvent::Pong))) => {}
                LoopEvent::Inbound(Some(Err(e))) => {
                    error!(error = %e, "ws error, treating connection as lost");
                    self.reconnect().await?;
                }
                LoopEvent::Inbound(None) => {
                    error!("ws disconnection");
                    self.reconnect().await?;
                }
                LoopEvent::IdleTimeout => {
                    if !self.probe_liveness().await? {
                        error!("No PONG from Kuzzle");
                        self.state = ConnectionState::Disconnected;
                        return Err(LinkError::PongTimeout(self.config.pong_timeout));
                    }
                }
            }
        }
    }

    /// Ping the backend and wait a bounded time for the pong. Text
    /// messages arriving meanwhile prove nothing about the probe; they are
    /// buffered and dispatched, in order, once the wait ends.
    async fn probe_liveness(&mut self) -> Result<bool> {
        info!("PING Kuzzle");
        let pong_timeout = self.config.pong_timeout;
        let mut buffered = Vec::new();
        let mut alive = false;

        {
            let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;
            transport.send_ping().await?;

            let deadline = tokio::time::Instant::now() + pong_timeout;
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, transport.next_event()).await {
                    Err(_) => break,
                    Ok(None) => break,
                    Ok(Some(Ok(TransportEvent::Pong))) => {
                        info!("PONG Kuzzle");
                        alive = true;
                        break;
                    }
                    Ok(Some(Ok(TransportEvent::Text(text)))) => buffered.push(text),
                    Ok(Some(Err(e))) => {
                        error!(error = %e, "ws error while awaiting PONG");
                        break;
                    }
                }
            }
        }

        for text in buffered {
            self.handle_message(&text);
        }
        Ok(alive)
    }

    /// Fixed-backoff reconnect with resubscription.
    async fn reconnect(&mut self) -> Result<()> {
        self.transport = None;
        let dropped = self.correlator.drain_and_drop();
        if dropped > 0 {
            warn!(dropped, "Pending requests dropped by disconnection");
        }
        self.state = ConnectionState::Reconnecting;
        info!(delay = ?self.config.reconnect_delay, "reconnecting...");
        tokio::time::sleep(self.config.reconnect_delay).await;

        self.state = ConnectionState::Connecting;
        match self.connector.connect().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
                if let Some(subscription) = self.subscription.clone() {
                    debug!("Re subscribing to own state...");
                    self.send_query(&subscription).await?;
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Reconnect failed");
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::PublishState { state, partial } => {
                let query = envelope::create_state(&self.identity, state, partial);
                if let Err(e) = self.send_query(&query).await {
                    error!(error = %e, "Failed to publish state");
                }
            }
            LinkCommand::SubscribeState { callback } => {
                self.on_state_changed = Some(callback);
                let query = envelope::subscribe_state(&self.identity.device_uid);
                self.subscription = Some(query.clone());
                if let Err(e) = self.send_query(&query).await {
                    error!(error = %e, "Failed to subscribe to state");
                }
            }
            LinkCommand::PublishDeviceInfo => {
                info!("Publishing device info...");
                let query = envelope::publish_device_info(&self.identity);
                if let Err(e) = self.send_query(&query).await {
                    error!(error = %e, "Failed to publish device info");
                }
            }
            LinkCommand::Query { mut query, reply } => {
                let request_id = query
                    .request_id
                    .get_or_insert_with(|| Uuid::new_v4().to_string())
                    .clone();
                let registered = self.correlator.register(
                    request_id.as_str(),
                    Box::new(move |response| {
                        let _ = reply.send(response);
                    }),
                );
                match registered {
                    Ok(()) => {
                        if let Err(e) = self.send_query(&query).await {
                            error!(error = %e, %request_id, "Failed to post query");
                        }
                    }
                    Err(e) => error!(error = %e, "Rejected correlated query"),
                }
            }
            LinkCommand::Disconnect => unreachable!("Disconnect is handled by the run loop"),
        }
    }

    /// Dispatch one inbound envelope: correlated responses first, then
    /// state-change notifications that are not our own publish echo.
    fn handle_message(&mut self, text: &str) {
        let response: ResponseEnvelope = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Unparseable message from Kuzzle");
                return;
            }
        };

        if response.status != 200 {
            match &response.error {
                Some(err) => error!(
                    status = response.status,
                    message = err.message.as_deref().unwrap_or(""),
                    stack = err.stack.as_deref().unwrap_or(""),
                    "Kuzzle error response"
                ),
                None => error!(status = response.status, "Kuzzle error response"),
            }
        }

        if let Some(request_id) = response.request_id.clone()
            && self.correlator.is_pending(&request_id)
        {
            self.correlator.resolve(&request_id, response);
            return;
        }

        if response.is_state_notification()
            && response.request_id.as_deref() != Some(self.own_publish_id.as_str())
        {
            let Some(callback) = self.on_state_changed.as_mut() else {
                return;
            };
            match response.state_change() {
                Some(change) => callback(change.state, change.is_partial),
                None => warn!("State notification without a state document"),
            }
        }
    }
}
