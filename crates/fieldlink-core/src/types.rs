use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a logical device on the backend.
///
/// Device UIDs are derived from the board serial number plus a role prefix
/// (for example `NFC_0012345678` or `buttons_0012345678`) and are used as the
/// document `_id` of the device-info record as well as the filter value of
/// state subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceUid(String);

impl DeviceUid {
    /// Create a new device UID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceUid` if the UID is empty or contains
    /// non-ASCII or whitespace characters.
    pub fn new(uid: impl Into<String>) -> Result<Self> {
        let uid = uid.into();
        if uid.is_empty() {
            return Err(Error::InvalidDeviceUid("must not be empty".to_string()));
        }
        if !uid.is_ascii() || uid.chars().any(char::is_whitespace) {
            return Err(Error::InvalidDeviceUid(format!(
                "must be ASCII without whitespace, got {uid:?}"
            )));
        }
        Ok(DeviceUid(uid))
    }

    /// Get the UID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceUid::new(s)
    }
}

/// Connection state of a device-link session.
///
/// Transitions: `Disconnected → Connecting → Connected`, then
/// `Connected → Reconnecting → Connecting` on a dropped connection, or
/// `Connected → Disconnected` on an explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_device_uid_valid() {
        let uid = DeviceUid::new("NFC_0012345678").unwrap();
        assert_eq!(uid.as_str(), "NFC_0012345678");
        assert_eq!(uid.to_string(), "NFC_0012345678");
    }

    #[rstest]
    #[case("")]
    #[case("has space")]
    #[case("tab\there")]
    #[case("nön-ascii")]
    fn test_device_uid_rejected(#[case] raw: &str) {
        assert!(DeviceUid::new(raw).is_err());
    }

    #[test]
    fn test_device_uid_from_str() {
        let uid: DeviceUid = "light_lvl_0012345678".parse().unwrap();
        assert_eq!(uid.as_str(), "light_lvl_0012345678");
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "Reconnecting");
    }
}
