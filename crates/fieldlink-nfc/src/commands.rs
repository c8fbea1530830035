//! Command codes understood by the reader.
//!
//! The reader answers every command `0xNN` with a response frame whose code
//! is `0xNN + 1`; [`CommandCode::response_code`] encodes that relation.

use fieldlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command opcodes of the reader protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCode {
    /// Run a self test.
    Diagnose,
    /// Query IC/firmware/revision/feature bytes.
    GetFirmwareVersion,
    /// Set internal protocol flags.
    SetParameters,
    /// Configure the SAM companion chip (required once after power-up).
    SamConfiguration,
    /// Tune RF field parameters.
    RfConfiguration,
    /// Select a passive target already known by its NFCID.
    InListPassiveTarget,
    /// Poll for passive targets entering the field.
    InAutoPoll,
}

impl CommandCode {
    /// Wire byte of this command.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            CommandCode::Diagnose => 0x01,
            CommandCode::GetFirmwareVersion => 0x02,
            CommandCode::SetParameters => 0x12,
            CommandCode::SamConfiguration => 0x14,
            CommandCode::RfConfiguration => 0x32,
            CommandCode::InListPassiveTarget => 0x4A,
            CommandCode::InAutoPoll => 0x60,
        }
    }

    /// Wire byte the reader uses when responding to this command.
    #[must_use]
    pub const fn response_code(self) -> u8 {
        self.as_u8() + 1
    }

    /// Parse a wire byte back into a command code.
    ///
    /// # Errors
    /// Returns `Error::InvalidCommandCode` for bytes outside the table.
    pub fn parse(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(CommandCode::Diagnose),
            0x02 => Ok(CommandCode::GetFirmwareVersion),
            0x12 => Ok(CommandCode::SetParameters),
            0x14 => Ok(CommandCode::SamConfiguration),
            0x32 => Ok(CommandCode::RfConfiguration),
            0x4A => Ok(CommandCode::InListPassiveTarget),
            0x60 => Ok(CommandCode::InAutoPoll),
            other => Err(Error::InvalidCommandCode(other)),
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandCode::Diagnose => "Diagnose",
            CommandCode::GetFirmwareVersion => "GetFirmwareVersion",
            CommandCode::SetParameters => "SetParameters",
            CommandCode::SamConfiguration => "SAMConfiguration",
            CommandCode::RfConfiguration => "RfConfiguration",
            CommandCode::InListPassiveTarget => "InListPassiveTarget",
            CommandCode::InAutoPoll => "InAutoPoll",
        };
        write!(f, "{name}")
    }
}
