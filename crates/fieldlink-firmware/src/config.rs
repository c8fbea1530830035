//! Typed firmware configuration.
//!
//! The configuration is one TOML file, deserialized into explicit structs
//! with named, validated fields and populated exactly once at startup.
//! Validation errors name the offending key so the admin can fix the file
//! without reading source code.

use std::path::Path;

use fieldlink_core::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub device: DeviceSettings,
    #[serde(default)]
    pub firmware: FirmwareSettings,
    pub kuzzle: KuzzleSettings,
    #[serde(default)]
    pub reader: ReaderSettings,
    #[serde(default)]
    pub buttons: ButtonSettings,
    #[serde(default)]
    pub motion_sensor: MotionSettings,
    #[serde(default)]
    pub light_sensor: LightSettings,
    #[serde(default)]
    pub rgb_light: RgbSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSettings {
    /// Account owning every device this board registers.
    pub owner: String,
    pub friendly_name: Option<String>,
    #[serde(default = "default_hw_type")]
    pub hw_type: String,
    #[serde(default = "default_hw_version")]
    pub hw_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirmwareSettings {
    #[serde(default = "default_fw_version")]
    pub version: String,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            version: default_fw_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KuzzleSettings {
    pub host: String,
    #[serde(default = "default_kuzzle_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_serial_port(),
            baud: default_baud(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gpios: Vec<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gpio: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LightSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mcp_channel: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RgbSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub led_count: u16,
}

fn default_hw_type() -> String {
    "rpi-sensor-board".to_string()
}

fn default_hw_version() -> String {
    "1.0".to_string()
}

fn default_fw_version() -> String {
    fieldlink_core::VERSION.to_string()
}

fn default_kuzzle_port() -> u16 {
    7512
}

fn default_true() -> bool {
    true
}

fn default_serial_port() -> String {
    "/dev/serial0".to_string()
}

fn default_baud() -> u32 {
    115_200
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.device.owner.trim().is_empty() {
            return Err(Error::MissingConfig("device.owner".to_string()));
        }
        if self.kuzzle.host.trim().is_empty() {
            return Err(Error::MissingConfig("kuzzle.host".to_string()));
        }
        if self.kuzzle.port == 0 {
            return Err(Error::Config("kuzzle.port must not be 0".to_string()));
        }
        if self.reader.enabled {
            if self.reader.port.trim().is_empty() {
                return Err(Error::MissingConfig("reader.port".to_string()));
            }
            if self.reader.baud == 0 {
                return Err(Error::Config("reader.baud must not be 0".to_string()));
            }
        }
        if self.buttons.enabled && self.buttons.gpios.is_empty() {
            return Err(Error::MissingConfig("buttons.gpios".to_string()));
        }
        if self.motion_sensor.enabled
            && self.buttons.enabled
            && self.buttons.gpios.contains(&self.motion_sensor.gpio)
        {
            return Err(Error::Config(format!(
                "motion_sensor.gpio {} collides with buttons.gpios",
                self.motion_sensor.gpio
            )));
        }
        if self.rgb_light.enabled && self.rgb_light.led_count == 0 {
            return Err(Error::Config(
                "rgb_light.led_count must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}
