//! Contracts and state-document mapping for the board's sensor
//! collaborators.
//!
//! GPIO edge detection, ADC sampling and LED rendering are platform glue
//! living outside the protocol core; this module fixes the seams they plug
//! into and the exact state documents they produce or consume:
//!
//! - button edges   → `{"button_0": "PRESSED" | "RELEASED", ...}` (full bank)
//! - motion edges   → `{"motion": bool}`
//! - light readings → `{"level": lux}`
//! - card events    → `{"card_id": "<hex>", "in_field": bool}`

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use fieldlink_nfc::CardEvent;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use fieldlink_kuzzle::LinkHandle;

/// One logic-level edge on an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub pin: u8,
    /// Sampled level after the edge settled; inputs are pulled up, so
    /// `false` means the contact is closed.
    pub level: bool,
}

/// Source of debounced pin edges.
///
/// Implementations block on their hardware; the pump runs them on a
/// dedicated worker thread. `None` ends the pump.
pub trait EdgeSource: Send {
    fn next_edge(&mut self) -> Option<PinEvent>;
}

/// [`EdgeSource`] fed through a channel by platform code.
pub struct ChannelEdgeSource {
    rx: mpsc::Receiver<PinEvent>,
}

/// Producer half of a [`ChannelEdgeSource`]; dropping it ends the pump.
#[derive(Clone)]
pub struct EdgeInjector {
    tx: mpsc::Sender<PinEvent>,
}

impl ChannelEdgeSource {
    #[must_use]
    pub fn new() -> (Self, EdgeInjector) {
        let (tx, rx) = mpsc::channel();
        (Self { rx }, EdgeInjector { tx })
    }
}

impl EdgeSource for ChannelEdgeSource {
    fn next_edge(&mut self) -> Option<PinEvent> {
        self.rx.recv().ok()
    }
}

impl EdgeInjector {
    pub fn inject(&self, pin: u8, level: bool) {
        let _ = self.tx.send(PinEvent { pin, level });
    }
}

/// Periodic ambient-light reading, in lux.
pub trait LightSensor: Send {
    fn read_level(&mut self) -> fieldlink_core::Result<f64>;
}

/// Consumer of remote light-strip state; actual rendering is platform glue.
pub trait StripRenderer: Send {
    fn apply(&mut self, state: &Value, partial: bool);
}

/// Renderer that only logs what it would display.
pub struct TracingRenderer;

impl StripRenderer for TracingRenderer {
    fn apply(&mut self, state: &Value, partial: bool) {
        info!(partial, %state, "Light strip state changed");
    }
}

/// Tracks the full button bank so every edge publishes the complete map.
#[derive(Debug, Clone)]
pub struct ButtonBank {
    gpios: Vec<u8>,
    states: BTreeMap<String, &'static str>,
}

impl ButtonBank {
    #[must_use]
    pub fn new(gpios: &[u8]) -> Self {
        let states = gpios
            .iter()
            .enumerate()
            .map(|(index, _)| (format!("button_{index}"), "RELEASED"))
            .collect();
        Self {
            gpios: gpios.to_vec(),
            states,
        }
    }

    /// Apply an edge. Returns the full bank state document when the pin
    /// belongs to this bank, `None` otherwise.
    pub fn apply(&mut self, event: PinEvent) -> Option<Value> {
        let index = self.gpios.iter().position(|pin| *pin == event.pin)?;
        let label = if event.level { "RELEASED" } else { "PRESSED" };
        self.states.insert(format!("button_{index}"), label);
        debug!(states = ?self.states, "Buttons state");
        Some(json!(self.states))
    }
}

/// Motion state document.
#[must_use]
pub fn motion_state(level: bool) -> Value {
    json!({ "motion": level })
}

/// Ambient-light state document.
#[must_use]
pub fn light_state(level: f64) -> Value {
    json!({ "level": level })
}

/// Card presence state document.
#[must_use]
pub fn card_state(event: &CardEvent) -> Value {
    json!({ "card_id": event.card_id(), "in_field": event.in_field })
}

/// Routes pin edges to the button and motion device links.
pub struct EdgeRouter {
    bank: ButtonBank,
    buttons: Option<LinkHandle>,
    motion_gpio: Option<u8>,
    motion: Option<LinkHandle>,
}

impl EdgeRouter {
    #[must_use]
    pub fn new(
        bank: ButtonBank,
        buttons: Option<LinkHandle>,
        motion_gpio: Option<u8>,
        motion: Option<LinkHandle>,
    ) -> Self {
        Self {
            bank,
            buttons,
            motion_gpio,
            motion,
        }
    }

    /// Publish whatever state document this edge maps to. An error means
    /// the link actor is gone and the pump should stop.
    pub fn route(&mut self, event: PinEvent) -> fieldlink_kuzzle::Result<()> {
        if let Some(doc) = self.bank.apply(event) {
            if let Some(handle) = &self.buttons {
                handle.publish_state_blocking(doc, false)?;
            }
        } else if self.motion_gpio == Some(event.pin) {
            debug!(motion = event.level, "Motion");
            if let Some(handle) = &self.motion {
                handle.publish_state_blocking(motion_state(event.level), false)?;
            }
        } else {
            warn!(pin = event.pin, "Unexpected GPIO");
        }
        Ok(())
    }
}

/// Worker-thread loop draining an edge source into the router.
pub fn pump_edges(mut source: impl EdgeSource, mut router: EdgeRouter) {
    while let Some(event) = source.next_edge() {
        if router.route(event).is_err() {
            warn!("Device link gone, stopping edge pump");
            break;
        }
    }
    debug!("Edge source exhausted");
}

/// Worker-thread loop publishing periodic light readings.
pub fn pump_light(mut sensor: impl LightSensor, handle: LinkHandle, period: Duration) {
    loop {
        match sensor.read_level() {
            Ok(level) => {
                if handle
                    .publish_state_blocking(light_state(level), false)
                    .is_err()
                {
                    warn!("Device link gone, stopping light sampling");
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Light reading failed"),
        }
        thread::sleep(period);
    }
}
