//! Device registry: one device link per logical device on the board.
//!
//! The board publishes several logical devices under UIDs derived from its
//! serial number (`NFC_<serial>`, `buttons_<serial>`, ...), plus a board
//! record listing all of them. Each gets its own [`DeviceLink`] actor;
//! their handles are what the rest of the firmware talks to.

use anyhow::Context;
use serde_json::json;
use tracing::{debug, error, info};

use fieldlink_core::DeviceUid;
use fieldlink_kuzzle::transport::WsConnector;
use fieldlink_kuzzle::{DeviceIdentity, DeviceLink, LinkConfig, LinkHandle};

use crate::config::{Config, KuzzleSettings};

/// Serial number of the board, used as the base of every device UID.
///
/// On a Raspberry Pi this is the CPU serial from `/proc/cpuinfo`; elsewhere
/// a fixed development serial is used.
#[must_use]
pub fn board_serial() -> String {
    if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") {
        for line in cpuinfo.lines() {
            if let Some(rest) = line.strip_prefix("Serial")
                && let Some((_, serial)) = rest.split_once(':')
            {
                let serial = serial.trim();
                if !serial.is_empty() {
                    debug!(serial, "Using CPU serial as board UID");
                    return serial.to_string();
                }
            }
        }
    }
    debug!("No CPU serial available, using development serial");
    "0012345678".to_string()
}

/// Handles of every connected device link.
pub struct DeviceFleet {
    pub board: LinkHandle,
    pub rfid: LinkHandle,
    pub buttons: Option<LinkHandle>,
    pub motion: Option<LinkHandle>,
    pub light: Option<LinkHandle>,
    pub rgb_light: Option<LinkHandle>,
}

impl DeviceFleet {
    /// Connect every enabled device plus the board record itself.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let serial = board_serial();
        let owner = config.device.owner.clone();
        info!(%serial, %owner, "Registering board devices");

        let mut attached: Vec<String> = Vec::new();

        let rfid_identity = DeviceIdentity::new(
            DeviceUid::new(format!("NFC_{serial}"))?,
            "RFID_reader",
        )
        .with_owner(&owner);
        attached.push(rfid_identity.device_uid.to_string());
        let rfid = spawn_link(&config.kuzzle, rfid_identity).await?;

        let buttons = if config.buttons.enabled {
            let identity = DeviceIdentity::new(
                DeviceUid::new(format!("buttons_{serial}"))?,
                "button",
            )
            .with_owner(&owner);
            attached.push(identity.device_uid.to_string());
            Some(spawn_link(&config.kuzzle, identity).await?)
        } else {
            None
        };

        let motion = if config.motion_sensor.enabled {
            let identity = DeviceIdentity::new(
                DeviceUid::new(format!("motion_{serial}"))?,
                "motion-sensor",
            )
            .with_owner(&owner);
            attached.push(identity.device_uid.to_string());
            Some(spawn_link(&config.kuzzle, identity).await?)
        } else {
            None
        };

        let light = if config.light_sensor.enabled {
            let identity = DeviceIdentity::new(
                DeviceUid::new(format!("light_lvl_{serial}"))?,
                "light_sensor",
            )
            .with_owner(&owner);
            attached.push(identity.device_uid.to_string());
            Some(spawn_link(&config.kuzzle, identity).await?)
        } else {
            None
        };

        let rgb_light = if config.rgb_light.enabled {
            let identity = DeviceIdentity::new(
                DeviceUid::new(format!("rgb_light_{serial}"))?,
                "neopixel-linear",
            )
            .with_owner(&owner)
            .with_additional_info(json!({ "led_count": config.rgb_light.led_count }));
            attached.push(identity.device_uid.to_string());
            Some(spawn_link(&config.kuzzle, identity).await?)
        } else {
            None
        };

        let mut board_identity = DeviceIdentity::new(
            DeviceUid::new(serial)?,
            config.device.hw_type.clone(),
        )
        .with_owner(&owner)
        .with_additional_info(json!({
            "devices": attached,
            "hw_version": config.device.hw_version,
            "sw_version": config.firmware.version,
        }));
        if let Some(name) = &config.device.friendly_name {
            board_identity = board_identity.with_friendly_name(name);
        }
        let board = spawn_link(&config.kuzzle, board_identity).await?;

        debug!("All device links are connected...");
        Ok(Self {
            board,
            rfid,
            buttons,
            motion,
            light,
            rgb_light,
        })
    }

    /// Ask every link actor to close its connection and stop.
    pub async fn shutdown(&self) {
        for handle in self.handles() {
            let _ = handle.disconnect().await;
        }
    }

    fn handles(&self) -> impl Iterator<Item = &LinkHandle> {
        [
            Some(&self.board),
            Some(&self.rfid),
            self.buttons.as_ref(),
            self.motion.as_ref(),
            self.light.as_ref(),
            self.rgb_light.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Connect one device link and run its actor in the background.
async fn spawn_link(
    kuzzle: &KuzzleSettings,
    identity: DeviceIdentity,
) -> anyhow::Result<LinkHandle> {
    let device_uid = identity.device_uid.clone();
    let connector = WsConnector::new(&kuzzle.host, kuzzle.port);
    let (mut link, handle) = DeviceLink::new(connector, identity, LinkConfig::default());

    link.connect(None)
        .await
        .with_context(|| format!("connecting device link for {device_uid}"))?;

    tokio::spawn(async move {
        if let Err(e) = link.run().await {
            error!(device = %device_uid, error = %e, "Device link terminated");
        }
    });

    Ok(handle)
}
