//! Scripted transport for driving the reader state machine in tests without
//! hardware.
//!
//! A [`ScriptedTransport`] serves reads from a queue of prepared chunks and
//! records every write. Partial chunks are carried over between reads, so a
//! whole response frame can be queued even though the driver reads it in
//! header + body pieces. An exhausted script fails the next read with a
//! transport error so a mis-scripted test terminates instead of spinning in
//! the driver's retry loop; use [`ScriptedTransport::push_silence`] to model
//! a genuine read timeout.

use std::collections::VecDeque;
use std::time::Duration;

use fieldlink_core::{Error, Result};

use crate::commands::CommandCode;
use crate::frame::{self, ACK, TFI_READER_TO_HOST};
use crate::transport::ByteTransport;

/// One scripted read outcome.
#[derive(Debug, Clone)]
enum Chunk {
    Bytes(Vec<u8>),
    /// Simulates a timeout: the read returns no bytes.
    Silence,
}

/// Queue-driven [`ByteTransport`] for tests and emulation.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    reads: VecDeque<Chunk>,
    written: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be served by subsequent reads.
    pub fn push_read(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.reads.push_back(Chunk::Bytes(bytes.into()));
        self
    }

    /// Queue an empty read, i.e. a timeout with no data.
    pub fn push_silence(&mut self) -> &mut Self {
        self.reads.push_back(Chunk::Silence);
        self
    }

    /// Queue an ACK literal.
    pub fn push_ack(&mut self) -> &mut Self {
        self.push_read(ACK)
    }

    /// Everything the driver wrote, in order.
    #[must_use]
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }
}

impl ByteTransport for ScriptedTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.written.push(bytes.to_vec());
        Ok(())
    }

    fn read_bytes(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>> {
        match self.reads.pop_front() {
            Some(Chunk::Silence) => Ok(Vec::new()),
            Some(Chunk::Bytes(mut chunk)) => {
                if chunk.len() > n {
                    let rest = chunk.split_off(n);
                    self.reads.push_front(Chunk::Bytes(rest));
                }
                Ok(chunk)
            }
            None => Err(Error::Transport("script exhausted".to_string())),
        }
    }
}

/// Build a reader→host response frame for `code`.
#[must_use]
pub fn response_frame(code: CommandCode, data: &[u8]) -> Vec<u8> {
    frame::encode_raw(TFI_READER_TO_HOST, code.response_code(), data)
        .expect("response payload fits a frame")
        .to_vec()
}

/// `GetFirmwareVersion` response carrying the four version bytes.
#[must_use]
pub fn firmware_version_response(ic: u8, ver: u8, rev: u8, support: u8) -> Vec<u8> {
    response_frame(CommandCode::GetFirmwareVersion, &[ic, ver, rev, support])
}

/// `InAutoPoll` response reporting no targets in the field.
#[must_use]
pub fn auto_poll_empty_response() -> Vec<u8> {
    response_frame(CommandCode::InAutoPoll, &[0x00])
}

/// `InAutoPoll` response reporting a single ISO14443-A target.
#[must_use]
pub fn auto_poll_single_response(nfcid: &[u8]) -> Vec<u8> {
    let mut target_data = vec![0x01, 0x00, 0x04, 0x08, nfcid.len() as u8];
    target_data.extend_from_slice(nfcid);
    let mut payload = vec![0x01, 0x10, target_data.len() as u8];
    payload.extend(target_data);
    response_frame(CommandCode::InAutoPoll, &payload)
}

/// `InListPassiveTarget` response with the given in-field target count.
#[must_use]
pub fn in_list_response(count: u8) -> Vec<u8> {
    response_frame(CommandCode::InListPassiveTarget, &[count])
}

/// `RfConfiguration` response (empty payload, diagnostic only).
#[must_use]
pub fn rf_configuration_response() -> Vec<u8> {
    response_frame(CommandCode::RfConfiguration, &[])
}

/// `SAMConfiguration` response (empty payload).
#[must_use]
pub fn sam_configuration_response() -> Vec<u8> {
    response_frame(CommandCode::SamConfiguration, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_chunk_carryover() {
        let mut transport = ScriptedTransport::new();
        transport.push_read(vec![1, 2, 3, 4, 5]);

        let head = transport.read_bytes(2, Duration::from_millis(10)).unwrap();
        assert_eq!(head, vec![1, 2]);
        let rest = transport.read_bytes(3, Duration::from_millis(10)).unwrap();
        assert_eq!(rest, vec![3, 4, 5]);
    }

    #[test]
    fn test_silence_returns_no_bytes() {
        let mut transport = ScriptedTransport::new();
        transport.push_silence().push_ack();

        assert!(
            transport
                .read_bytes(6, Duration::from_millis(10))
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            transport.read_bytes(6, Duration::from_millis(10)).unwrap(),
            ACK.to_vec()
        );
    }

    #[test]
    fn test_exhausted_script_errors() {
        let mut transport = ScriptedTransport::new();
        assert!(transport.read_bytes(1, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_writes_recorded() {
        let mut transport = ScriptedTransport::new();
        transport.write_bytes(&[0xDE, 0xAD]).unwrap();
        assert_eq!(transport.written(), &[vec![0xDE, 0xAD]]);
    }
}
