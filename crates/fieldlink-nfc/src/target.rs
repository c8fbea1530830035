//! Parsing of card-target reports out of reader responses.
//!
//! An `InAutoPoll` response payload looks like:
//!
//! ```text
//! [NbTgt] [Type] [DataLen] [Tg] [SENS_RES hi] [SENS_RES lo] [SEL_RES] [IdLen] [NFCID...]
//! ```
//!
//! `InListPassiveTarget` responses reuse the leading target count, which is
//! all the presence-confirmation loop needs.

use fieldlink_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::frame::hex_dump;

/// A passive target detected in the RF field, identified by its NFCID bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTarget {
    /// SENS_RES (ATQA) bytes as reported.
    pub sens_res: [u8; 2],
    /// SEL_RES (SAK) byte.
    pub sel_res: u8,
    /// NFCID bytes; the identity of the card.
    pub nfcid: Vec<u8>,
}

impl CardTarget {
    /// NFCID rendered as an uppercase hex string, the form published as
    /// `card_id` state.
    #[must_use]
    pub fn nfcid_hex(&self) -> String {
        hex_dump(&self.nfcid, "")
    }
}

/// Outcome of one `InAutoPoll` exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoPollReport {
    /// Number of targets the reader saw (only the first is parsed).
    pub targets_seen: u8,
    /// First reported target, when any.
    pub target: Option<CardTarget>,
}

/// Parse an `InAutoPoll` response payload.
///
/// # Errors
/// Returns `Error::InvalidFrame` when the payload is shorter than its own
/// length fields claim. Zero targets is a normal outcome, not an error.
pub fn parse_auto_poll(data: &[u8]) -> Result<AutoPollReport> {
    let targets_seen = *data
        .first()
        .ok_or_else(|| Error::InvalidFrame("empty InAutoPoll payload".to_string()))?;
    if targets_seen == 0 {
        return Ok(AutoPollReport {
            targets_seen: 0,
            target: None,
        });
    }

    if data.len() < 3 {
        return Err(Error::InvalidFrame(
            "InAutoPoll payload truncated before target data".to_string(),
        ));
    }
    let target_len = data[2] as usize;
    let target_data = data
        .get(3..3 + target_len)
        .ok_or_else(|| Error::InvalidFrame("InAutoPoll target data truncated".to_string()))?;

    // [Tg] [SENS_RES(2)] [SEL_RES] [IdLen] [NFCID...]
    if target_data.len() < 5 {
        return Err(Error::InvalidFrame(format!(
            "target data too short: {} bytes",
            target_data.len()
        )));
    }
    let nfcid_len = target_data[4] as usize;
    let nfcid = target_data
        .get(5..5 + nfcid_len)
        .ok_or_else(|| Error::InvalidFrame("NFCID truncated".to_string()))?;

    Ok(AutoPollReport {
        targets_seen,
        target: Some(CardTarget {
            sens_res: [target_data[1], target_data[2]],
            sel_res: target_data[3],
            nfcid: nfcid.to_vec(),
        }),
    })
}

/// Extract the in-field target count from an `InListPassiveTarget` response
/// payload.
///
/// # Errors
/// Returns `Error::InvalidFrame` on an empty payload.
pub fn parse_target_count(data: &[u8]) -> Result<u8> {
    data.first().copied().ok_or_else(|| {
        Error::InvalidFrame("empty InListPassiveTarget payload".to_string())
    })
}
