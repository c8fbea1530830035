//! Serial protocol driver for the PN532-family NFC/RFID reader.
//!
//! The reader speaks a byte-oriented wire protocol over a serial line:
//! checksummed frames carry commands and responses, and a fixed 6-byte ACK
//! acknowledges every accepted command before its response frame follows.
//!
//! # Architecture
//!
//! ```text
//! NfcReader (polling state machine)
//!     │
//!     ├─> frame (encode/decode, checksums, ACK/NACK)
//!     ├─> commands (opcode table)
//!     ├─> target (InAutoPoll / InListPassiveTarget response parsing)
//!     │
//!     └─> ByteTransport ───(serial)───> PN532 module
//! ```
//!
//! The driver runs a blocking loop and is meant to live on a dedicated
//! worker thread; card presence changes are delivered through a callback.

pub mod commands;
pub mod frame;
pub mod mock;
pub mod reader;
pub mod target;
pub mod transport;

pub use commands::CommandCode;
pub use frame::{ACK, NACK, ParsedFrame};
pub use reader::{CardEvent, FirmwareVersion, NfcReader, PollConfig, PollState, ReaderConfig};
pub use target::{AutoPollReport, CardTarget};
pub use transport::{ByteTransport, SerialTransport};
