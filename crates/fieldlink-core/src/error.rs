use std::fmt;

use thiserror::Error;

/// Which of the two frame checksums failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// The one-byte length checksum (LCS).
    Length,
    /// The data checksum over TFI + payload (DCS).
    Data,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Length => write!(f, "length"),
            ChecksumKind::Data => write!(f, "data"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // Reader protocol errors
    #[error("Frame too short: {actual} bytes, need at least {min}")]
    FrameTooShort { min: usize, actual: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("{kind} checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        kind: ChecksumKind,
        expected: u8,
        actual: u8,
    },

    #[error("Payload too long for a single frame: {0} bytes")]
    PayloadTooLong(usize),

    #[error("Invalid command code: {0:#04x}")]
    InvalidCommandCode(u8),

    // Reader transport errors
    #[error("Read timed out: wanted {expected} bytes, got {actual}")]
    ReadTimeout { expected: usize, actual: usize },

    #[error("Reader answered NACK")]
    Nack,

    #[error("No ACK after {0} attempts")]
    AckRetriesExhausted(u32),

    #[error("Reader not ready: {0}")]
    NotReady(String),

    #[error("Serial transport error: {0}")]
    Transport(String),

    // Device identity errors
    #[error("Invalid device UID: {0}")]
    InvalidDeviceUid(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
