//! Wire frame format for the NFC reader protocol.
//!
//! Every command and response travels in a checksummed frame:
//!
//! ```text
//! 00 00 FF | LEN | LCS | TFI | BODY[0..LEN-1] | DCS | 00
//! ^^^^^^^^                                            ^^
//! preamble + start code                          postamble
//! ```
//!
//! `LEN` counts the TFI plus the body (command/response code and payload),
//! `LCS = (-LEN) & 0xFF`, and `DCS = (-(TFI + ΣBODY)) & 0xFF`. The TFI byte
//! identifies the direction: `0xD4` host→reader, `0xD5` reader→host, and the
//! special `0x7F` marks a syntax-error report from the reader.
//!
//! ACK and NACK are *not* frames; they are fixed 6-byte literals compared
//! byte-for-byte.

use bytes::{BufMut, Bytes, BytesMut};
use fieldlink_core::{ChecksumKind, Error, Result};

use crate::commands::CommandCode;

/// Frame preamble byte.
pub const PREAMBLE: u8 = 0x00;
/// Two-byte start code following the preamble.
pub const START_CODE: [u8; 2] = [0x00, 0xFF];
/// Frame postamble byte.
pub const POSTAMBLE: u8 = 0x00;

/// TFI for frames sent from the host to the reader.
pub const TFI_HOST_TO_READER: u8 = 0xD4;
/// TFI for frames sent from the reader to the host.
pub const TFI_READER_TO_HOST: u8 = 0xD5;
/// TFI the reader uses to report a syntax error.
pub const TFI_SYNTAX_ERROR: u8 = 0x7F;

/// Fixed acknowledgement literal.
pub const ACK: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
/// Fixed negative-acknowledgement literal.
pub const NACK: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];

/// Shortest valid frame: an empty body (`LEN == 1`, TFI only).
pub const MIN_FRAME_LEN: usize = 8;

/// Longest payload a single-byte length field can carry alongside the TFI
/// and command code.
pub const MAX_PAYLOAD_LEN: usize = 252;

/// Compute the one-byte length checksum (`LCS`).
#[inline]
#[must_use]
pub fn length_checksum(len: u8) -> u8 {
    0u8.wrapping_sub(len)
}

/// Compute the data checksum (`DCS`) over the TFI and body bytes.
#[inline]
#[must_use]
pub fn data_checksum(bytes: impl IntoIterator<Item = u8>) -> u8 {
    let sum = bytes.into_iter().fold(0u8, u8::wrapping_add);
    0u8.wrapping_sub(sum)
}

/// Exact comparison against the 6-byte ACK literal.
#[inline]
#[must_use]
pub fn is_ack(bytes: &[u8]) -> bool {
    bytes == ACK
}

/// Exact comparison against the 6-byte NACK literal.
#[inline]
#[must_use]
pub fn is_nack(bytes: &[u8]) -> bool {
    bytes == NACK
}

/// A decoded frame, checksums already verified.
///
/// `code` is the first body byte (the command or response code); the special
/// syntax-error frame (`TFI == 0x7F`) carries an empty body and therefore no
/// code. Decoding never fails on a syntax-error frame; callers are expected
/// to log it and retry, not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    tfi: u8,
    code: Option<u8>,
    data: Bytes,
}

impl ParsedFrame {
    /// The TFI byte of this frame.
    #[must_use]
    pub fn tfi(&self) -> u8 {
        self.tfi
    }

    /// The command/response code, if the body carried one.
    #[must_use]
    pub fn code(&self) -> Option<u8> {
        self.code
    }

    /// Payload bytes after the command/response code.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the reader reported a syntax error instead of a response.
    #[must_use]
    pub fn is_error_frame(&self) -> bool {
        self.tfi == TFI_SYNTAX_ERROR
    }
}

/// Encode a host→reader command frame.
///
/// # Errors
/// Returns `Error::PayloadTooLong` if `data` does not fit the single-byte
/// length field.
pub fn encode(code: CommandCode, data: &[u8]) -> Result<Bytes> {
    encode_raw(TFI_HOST_TO_READER, code.as_u8(), data)
}

/// Encode a frame with an arbitrary TFI and code byte.
///
/// The driver only ever sends host→reader frames; this variant exists so
/// tests and emulated readers can fabricate reader→host responses.
pub fn encode_raw(tfi: u8, code: u8, data: &[u8]) -> Result<Bytes> {
    if data.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLong(data.len()));
    }

    let len = (data.len() + 2) as u8;
    let mut buf = BytesMut::with_capacity(data.len() + 9);
    buf.put_u8(PREAMBLE);
    buf.put_slice(&START_CODE);
    buf.put_u8(len);
    buf.put_u8(length_checksum(len));
    buf.put_u8(tfi);
    buf.put_u8(code);
    buf.put_slice(data);
    buf.put_u8(data_checksum(
        [tfi, code].into_iter().chain(data.iter().copied()),
    ));
    buf.put_u8(POSTAMBLE);
    Ok(buf.freeze())
}

/// Decode and validate a complete frame.
///
/// Both checksums are recomputed; a mismatch fails with
/// `Error::ChecksumMismatch`. A syntax-error frame (`TFI == 0x7F`) decodes
/// successfully and is flagged via [`ParsedFrame::is_error_frame`].
///
/// # Errors
/// - `Error::FrameTooShort` if fewer bytes than the header demands arrived
/// - `Error::InvalidFrame` on a bad preamble, start code or postamble
/// - `Error::ChecksumMismatch` if either checksum disagrees
pub fn decode(bytes: &[u8]) -> Result<ParsedFrame> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(Error::FrameTooShort {
            min: MIN_FRAME_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0] != PREAMBLE || bytes[1] != START_CODE[0] || bytes[2] != START_CODE[1] {
        return Err(Error::InvalidFrame(format!(
            "bad preamble/start code: {:02X} {:02X} {:02X}",
            bytes[0], bytes[1], bytes[2]
        )));
    }

    let len = bytes[3];
    let lcs = bytes[4];
    let expected_lcs = length_checksum(len);
    if lcs != expected_lcs {
        return Err(Error::ChecksumMismatch {
            kind: ChecksumKind::Length,
            expected: expected_lcs,
            actual: lcs,
        });
    }
    if len == 0 {
        return Err(Error::InvalidFrame("zero length field".to_string()));
    }

    let total = len as usize + 7;
    if bytes.len() < total {
        return Err(Error::FrameTooShort {
            min: total,
            actual: bytes.len(),
        });
    }

    let tfi = bytes[5];
    let body = &bytes[6..5 + len as usize];
    let dcs = bytes[5 + len as usize];
    let expected_dcs = data_checksum(std::iter::once(tfi).chain(body.iter().copied()));
    if dcs != expected_dcs {
        return Err(Error::ChecksumMismatch {
            kind: ChecksumKind::Data,
            expected: expected_dcs,
            actual: dcs,
        });
    }
    if bytes[6 + len as usize] != POSTAMBLE {
        return Err(Error::InvalidFrame(format!(
            "bad postamble: {:02X}",
            bytes[6 + len as usize]
        )));
    }

    Ok(ParsedFrame {
        tfi,
        code: body.first().copied(),
        data: Bytes::copy_from_slice(if body.is_empty() { &[] } else { &body[1..] }),
    })
}

/// Render bytes as the uppercase hex string used throughout the logs.
#[must_use]
pub fn hex_dump(bytes: &[u8], sep: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_firmware_version_vector() {
        let frame = encode(CommandCode::GetFirmwareVersion, &[]).unwrap();
        assert_eq!(
            frame.as_ref(),
            &[0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
    }

    #[test]
    fn test_encode_with_payload() {
        // SAMConfiguration: normal mode, 0x17 timeout, no IRQ
        let frame = encode(CommandCode::SamConfiguration, &[0x01, 0x17, 0x00]).unwrap();
        assert_eq!(frame[3], 5); // TFI + code + 3 payload bytes
        assert_eq!(frame[4], length_checksum(5));
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.tfi(), TFI_HOST_TO_READER);
        assert_eq!(decoded.code(), Some(0x14));
        assert_eq!(decoded.data(), &[0x01, 0x17, 0x00]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(CommandCode::InAutoPoll, &payload),
            Err(Error::PayloadTooLong(_))
        ));
    }

    #[test]
    fn test_ack_identity() {
        assert!(is_ack(&[0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00]));
        assert!(is_nack(&NACK));
        assert!(!is_ack(&NACK));

        // Any single bit flip must break the comparison
        for byte in 0..ACK.len() {
            for bit in 0..8 {
                let mut flipped = ACK;
                flipped[byte] ^= 1 << bit;
                assert!(!is_ack(&flipped), "bit {bit} of byte {byte} accepted");
            }
        }
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            decode(&ACK),
            Err(Error::FrameTooShort { min: 8, actual: 6 })
        ));
    }

    #[test]
    fn test_decode_length_checksum_mismatch() {
        let mut frame = encode(CommandCode::GetFirmwareVersion, &[]).unwrap().to_vec();
        frame[4] = frame[4].wrapping_add(1);
        assert!(matches!(
            decode(&frame),
            Err(Error::ChecksumMismatch {
                kind: ChecksumKind::Length,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_data_checksum_mismatch() {
        let mut frame = encode(CommandCode::InAutoPoll, &[0x64, 0x01, 0x10])
            .unwrap()
            .to_vec();
        let dcs_idx = frame.len() - 2;
        frame[dcs_idx] = frame[dcs_idx].wrapping_add(1);
        assert!(matches!(
            decode(&frame),
            Err(Error::ChecksumMismatch {
                kind: ChecksumKind::Data,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_bad_postamble() {
        let mut frame = encode(CommandCode::GetFirmwareVersion, &[]).unwrap().to_vec();
        let last = frame.len() - 1;
        frame[last] = 0x42;
        assert!(matches!(decode(&frame), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_syntax_error_frame_is_not_fatal() {
        // 00 00 FF 01 FF 7F 81 00, the reader's canned syntax-error report
        let frame = [0x00, 0x00, 0xFF, 0x01, 0xFF, 0x7F, 0x81, 0x00];
        let parsed = decode(&frame).unwrap();
        assert!(parsed.is_error_frame());
        assert_eq!(parsed.code(), None);
        assert!(parsed.data().is_empty());
    }

    #[test]
    fn test_response_frame_roundtrip() {
        let frame = encode_raw(TFI_READER_TO_HOST, 0x03, &[0x32, 0x01, 0x06, 0x07]).unwrap();
        let parsed = decode(&frame).unwrap();
        assert_eq!(parsed.tfi(), TFI_READER_TO_HOST);
        assert_eq!(parsed.code(), Some(0x03));
        assert_eq!(parsed.data(), &[0x32, 0x01, 0x06, 0x07]);
        assert!(!parsed.is_error_frame());
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x04, 0xAB, 0xCD], ""), "04ABCD");
        assert_eq!(hex_dump(&[0x04, 0xAB], " "), "04 AB");
    }
}
