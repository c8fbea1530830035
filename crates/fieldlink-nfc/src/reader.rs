//! Reader driver: command/ACK exchange and the card polling state machine.
//!
//! Every command follows the same exchange: write the frame, expect the
//! 6-byte ACK within a short timeout, then read the full response frame.
//! A missing or garbled ACK resends the same command; retries are
//! unbounded but paced, so a sleeping or slow reader is waited out rather
//! than busy-looped. Read timeouts and checksum failures are logged and the
//! current step retried; neither ever terminates the polling loop.
//!
//! Card presence is tracked by [`NfcReader::start_polling`]: `InAutoPoll`
//! detects a target entering the field, then a confirmation loop of
//! `RfConfiguration` + `InListPassiveTarget` re-selects the same NFCID until
//! the reader reports it gone.

use std::ops::ControlFlow;
use std::thread;
use std::time::Duration;

use fieldlink_core::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::commands::CommandCode;
use crate::frame::{self, ACK, ParsedFrame, TFI_READER_TO_HOST};
use crate::target::{self, CardTarget};
use crate::transport::ByteTransport;

/// Fixed RF tuning bytes sent during presence confirmation (diagnostic
/// exchange, result unused).
const RF_TUNING: [u8; 4] = [0x05, 0x00, 0x01, 0x02];

/// Leading bytes of the `InListPassiveTarget` payload: one target, 106 kbps
/// type A, followed by the NFCID to re-select.
const IN_LIST_PASSIVE_PREFIX: [u8; 2] = [0x01, 0x00];

/// SAMConfiguration payload: normal mode, 0x17 timeout units, no IRQ pin.
const SAM_NORMAL_MODE: [u8; 3] = [0x01, 0x17, 0x00];

/// How many ACK/response rounds a version probe is allowed before giving
/// up; keeps [`NfcReader::version_check`] bounded so a supervisor can
/// decide when to stop trying a dead or absent reader.
const VERSION_EXCHANGE_ATTEMPTS: u32 = 3;

/// `InAutoPoll` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Number of polling rounds per command (0x01-0xFE, 0xFF = endless).
    pub poll_count: u8,
    /// Polling period in 150 ms units.
    pub period: u8,
    /// Target type to poll for (0x10 = ISO14443-A passive).
    pub target_type: u8,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_count: 0x64,
            period: 0x01,
            target_type: 0x10,
        }
    }
}

/// Driver tuning knobs.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// How long to wait for the 6-byte ACK. Historical firmware builds used
    /// anything from 30 ms to an unbounded wait; it is a tunable here, and
    /// the resend loop supplies the patience.
    pub ack_timeout: Duration,

    /// Timeout for each piece of a response frame.
    pub read_timeout: Duration,

    /// Pause between resend attempts, keeping the retry loop off the CPU.
    pub retry_delay: Duration,

    /// Settle time after the wake-up preamble.
    pub wakeup_settle: Duration,

    /// `InAutoPoll` parameters.
    pub poll: PollConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(30),
            read_timeout: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(100),
            wakeup_settle: Duration::from_secs(2),
            poll: PollConfig::default(),
        }
    }
}

/// Firmware identification bytes returned by `GetFirmwareVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub ver: u8,
    pub rev: u8,
    pub support: u8,
}

impl FirmwareVersion {
    /// Extract the version bytes from a decoded response frame.
    ///
    /// Returns `None` when the frame is not a well-formed
    /// `GetFirmwareVersion` response; the caller decides whether that is
    /// fatal.
    #[must_use]
    pub fn parse(frame: &ParsedFrame) -> Option<Self> {
        if frame.tfi() != TFI_READER_TO_HOST
            || frame.code() != Some(CommandCode::GetFirmwareVersion.response_code())
        {
            return None;
        }
        let data = frame.data();
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            ic: data[0],
            ver: data[1],
            rev: data[2],
            support: data[3],
        })
    }
}

/// Card presence change reported to the polling callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardEvent {
    /// NFCID bytes of the card.
    pub nfcid: Vec<u8>,
    /// `true` when the card entered the field, `false` when it left.
    pub in_field: bool,
}

impl CardEvent {
    /// NFCID as the uppercase hex string published as `card_id`.
    #[must_use]
    pub fn card_id(&self) -> String {
        frame::hex_dump(&self.nfcid, "")
    }
}

/// Where the polling state machine currently stands.
///
/// Transitions are driven only by responses to sent commands; wall-clock
/// time only shows up as read timeouts meaning "no data yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// No exchange in flight, no card tracked.
    Idle,
    /// A command was written; waiting for its ACK.
    AwaitingAck,
    /// A card is in the field and being presence-checked.
    InField(CardTarget),
}

/// Driver for a PN532-family reader over a [`ByteTransport`].
pub struct NfcReader<T: ByteTransport> {
    transport: T,
    config: ReaderConfig,
    state: PollState,
    version: Option<FirmwareVersion>,
}

impl<T: ByteTransport> NfcReader<T> {
    pub fn new(transport: T, config: ReaderConfig) -> Self {
        Self {
            transport,
            config,
            state: PollState::Idle,
            version: None,
        }
    }

    /// Current polling state.
    #[must_use]
    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Borrow the underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Firmware version captured by the last successful
    /// [`version_check`](Self::version_check).
    #[must_use]
    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.version
    }

    /// Abort whatever command the reader is currently executing by writing
    /// the ACK literal.
    pub fn cancel_command(&mut self) -> Result<()> {
        self.transport.write_bytes(&ACK)
    }

    /// Wake the reader out of power-down: a long 0x55 preamble, a settle
    /// pause, then a command abort.
    pub fn wake_up(&mut self) -> Result<()> {
        let mut preamble = [0u8; 16];
        preamble[0] = 0x55;
        preamble[1] = 0x55;
        self.transport.write_bytes(&preamble)?;
        thread::sleep(self.config.wakeup_settle);
        self.cancel_command()?;
        thread::sleep(self.config.wakeup_settle);
        Ok(())
    }

    /// Wake the reader and put the SAM into normal mode.
    pub fn initialize(&mut self) -> Result<()> {
        self.wake_up()?;
        self.sam_configuration()
    }

    /// Configure the SAM companion for normal (card reader) operation.
    pub fn sam_configuration(&mut self) -> Result<()> {
        info!(">SAMConfiguration");
        self.exchange(CommandCode::SamConfiguration, &SAM_NORMAL_MODE, None)?;
        info!("<SAMConfiguration");
        Ok(())
    }

    /// Set the reader's internal protocol flags.
    pub fn set_parameters(&mut self, flags: u8) -> Result<()> {
        self.exchange(CommandCode::SetParameters, &[flags], None)?;
        Ok(())
    }

    /// Run a reader self test and return its raw response.
    pub fn diagnose(&mut self, test: u8, body: &[u8]) -> Result<ParsedFrame> {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(test);
        payload.extend_from_slice(body);
        self.exchange(CommandCode::Diagnose, &payload, None)
    }

    /// Write a command frame and spin until the reader ACKs it.
    ///
    /// A timed-out or garbled ACK read resends the same command; no
    /// distinction is drawn between "no data" and "garbage data". Retries
    /// are paced by [`ReaderConfig::retry_delay`] and unbounded unless
    /// `max_attempts` says otherwise.
    pub fn send_command(&mut self, code: CommandCode, data: &[u8]) -> Result<()> {
        self.send_command_bounded(code, data, None)
    }

    fn send_command_bounded(
        &mut self,
        code: CommandCode,
        data: &[u8],
        max_attempts: Option<u32>,
    ) -> Result<()> {
        let encoded = frame::encode(code, data)?;
        self.state = PollState::AwaitingAck;

        let mut attempts = 0u32;
        loop {
            self.transport.write_bytes(&encoded)?;
            attempts += 1;

            match self.read_ack() {
                Ok(()) => {
                    debug!(command = %code, "ACK");
                    return Ok(());
                }
                Err(Error::ReadTimeout { .. }) => {
                    warn!(command = %code, "Command hasn't been ACKed, resending");
                }
                Err(Error::Nack) => {
                    warn!(command = %code, "NACK");
                }
                Err(e) => {
                    self.state = PollState::Idle;
                    return Err(e);
                }
            }

            if let Some(max) = max_attempts
                && attempts >= max
            {
                self.state = PollState::Idle;
                return Err(Error::AckRetriesExhausted(attempts));
            }
            thread::sleep(self.config.retry_delay);
        }
    }

    fn read_ack(&mut self) -> Result<()> {
        let bytes = self.transport.read_bytes(ACK.len(), self.config.ack_timeout)?;
        if bytes.len() < ACK.len() {
            return Err(Error::ReadTimeout {
                expected: ACK.len(),
                actual: bytes.len(),
            });
        }
        if frame::is_ack(&bytes) {
            Ok(())
        } else {
            error!(bytes = %frame::hex_dump(&bytes, " "), "Expected ACK");
            Err(Error::Nack)
        }
    }

    /// Read one complete response frame: the fixed five-byte header first,
    /// then however many bytes its length field announces.
    fn read_response(&mut self) -> Result<ParsedFrame> {
        let head = self.transport.read_bytes(5, self.config.read_timeout)?;
        if head.len() < 5 {
            return Err(Error::ReadTimeout {
                expected: 5,
                actual: head.len(),
            });
        }

        let len = head[3] as usize;
        let rest_len = len + 2; // TFI + body already in len; DCS + postamble follow
        let rest = self.transport.read_bytes(rest_len, self.config.read_timeout)?;
        if rest.len() < rest_len {
            return Err(Error::ReadTimeout {
                expected: rest_len,
                actual: rest.len(),
            });
        }

        let mut buf = head;
        buf.extend_from_slice(&rest);
        debug!(frame = %frame::hex_dump(&buf, " "), "Recv frame");

        let parsed = frame::decode(&buf)?;
        if parsed.is_error_frame() {
            error!("Syntax error frame!");
        }
        Ok(parsed)
    }

    /// One full command/response round, retrying the whole step on read
    /// timeouts and protocol errors. Transport failures propagate.
    fn exchange(
        &mut self,
        code: CommandCode,
        data: &[u8],
        max_attempts: Option<u32>,
    ) -> Result<ParsedFrame> {
        let mut attempts = 0u32;
        loop {
            self.send_command_bounded(code, data, max_attempts)?;
            attempts += 1;

            match self.read_response() {
                Ok(parsed) => {
                    self.state = PollState::Idle;
                    return Ok(parsed);
                }
                Err(Error::ReadTimeout { expected, actual }) => {
                    debug!(command = %code, expected, actual, "No response yet, retrying");
                }
                Err(
                    e @ (Error::ChecksumMismatch { .. }
                    | Error::InvalidFrame(_)
                    | Error::FrameTooShort { .. }),
                ) => {
                    error!(command = %code, error = %e, "Protocol error, retrying");
                }
                Err(e) => {
                    self.state = PollState::Idle;
                    return Err(e);
                }
            }

            if let Some(max) = max_attempts
                && attempts >= max
            {
                self.state = PollState::Idle;
                return Err(Error::ReadTimeout {
                    expected: 5,
                    actual: 0,
                });
            }
            thread::sleep(self.config.retry_delay);
        }
    }

    /// Probe the reader's firmware version.
    ///
    /// Returns `None` when the probe fails; a missing reader is for the
    /// caller to handle, typically by retrying a bounded number of times
    /// before giving up on polling altogether. This probe is the one
    /// exchange that is internally bounded for exactly that reason.
    pub fn version_check(&mut self) -> Option<FirmwareVersion> {
        debug!("Get firmware revision: GetFirmwareVersion");
        let parsed = match self.exchange(
            CommandCode::GetFirmwareVersion,
            &[],
            Some(VERSION_EXCHANGE_ATTEMPTS),
        ) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "GetFirmwareVersion exchange failed");
                return None;
            }
        };

        match FirmwareVersion::parse(&parsed) {
            Some(version) => {
                info!(ver = version.ver, rev = version.rev, "Found NFC reader");
                self.version = Some(version);
                Some(version)
            }
            None => {
                error!("Invalid firmware version frame");
                None
            }
        }
    }

    /// Poll for cards until the callback breaks the loop.
    ///
    /// Emits `{nfcid, in_field: true}` when a target enters the field and
    /// `{nfcid, in_field: false}` once a presence check reports it gone;
    /// idle polls with zero targets emit nothing. Only the first reported
    /// target is tracked; additional ones are logged and ignored.
    ///
    /// # Errors
    /// Returns `Error::NotReady` unless a [`version_check`](Self::version_check)
    /// has succeeded, and propagates hard transport failures. Timeouts and
    /// malformed frames are retried in place and never end the loop.
    pub fn start_polling<F>(&mut self, mut on_card_event: F) -> Result<()>
    where
        F: FnMut(CardEvent) -> ControlFlow<()>,
    {
        if self.version.is_none() {
            return Err(Error::NotReady(
                "firmware version probe has not succeeded".to_string(),
            ));
        }

        debug!("Start polling for RFID cards...");
        let poll_data = [
            self.config.poll.poll_count,
            self.config.poll.period,
            self.config.poll.target_type,
        ];

        loop {
            let parsed = self.exchange(CommandCode::InAutoPoll, &poll_data, None)?;
            if parsed.is_error_frame() {
                continue;
            }

            let report = match target::parse_auto_poll(parsed.data()) {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "Malformed InAutoPoll response");
                    continue;
                }
            };

            let Some(card) = report.target else {
                continue;
            };
            if report.targets_seen > 1 {
                warn!(seen = report.targets_seen, "Not reading second card info...");
            }

            info!(card_id = %card.nfcid_hex(), "Card entering field");
            self.state = PollState::InField(card.clone());
            let event = CardEvent {
                nfcid: card.nfcid.clone(),
                in_field: true,
            };
            if on_card_event(event).is_break() {
                self.state = PollState::Idle;
                return Ok(());
            }

            if self.confirm_presence(&card, &mut on_card_event)?.is_break() {
                self.state = PollState::Idle;
                return Ok(());
            }
        }
    }

    /// Re-select the tracked card until the reader reports it gone, then
    /// emit the leave event. Returns the callback's verdict.
    fn confirm_presence<F>(
        &mut self,
        card: &CardTarget,
        on_card_event: &mut F,
    ) -> Result<ControlFlow<()>>
    where
        F: FnMut(CardEvent) -> ControlFlow<()>,
    {
        let mut select = Vec::with_capacity(IN_LIST_PASSIVE_PREFIX.len() + card.nfcid.len());
        select.extend_from_slice(&IN_LIST_PASSIVE_PREFIX);
        select.extend_from_slice(&card.nfcid);

        loop {
            // Retune the field first; the response is diagnostic only.
            let _ = self.exchange(CommandCode::RfConfiguration, &RF_TUNING, None)?;
            self.state = PollState::InField(card.clone());

            let parsed = self.exchange(CommandCode::InListPassiveTarget, &select, None)?;
            self.state = PollState::InField(card.clone());
            let count = match target::parse_target_count(parsed.data()) {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "Malformed InListPassiveTarget response");
                    continue;
                }
            };

            if count == 0 {
                info!(card_id = %card.nfcid_hex(), "Card leaving field");
                self.state = PollState::Idle;
                return Ok(on_card_event(CardEvent {
                    nfcid: card.nfcid.clone(),
                    in_field: false,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        ScriptedTransport, auto_poll_single_response, firmware_version_response,
    };

    fn test_config() -> ReaderConfig {
        ReaderConfig {
            ack_timeout: Duration::from_millis(1),
            read_timeout: Duration::from_millis(1),
            retry_delay: Duration::ZERO,
            wakeup_settle: Duration::ZERO,
            ..ReaderConfig::default()
        }
    }

    #[test]
    fn test_version_check_parses_response() {
        let mut transport = ScriptedTransport::new();
        transport
            .push_ack()
            .push_read(firmware_version_response(0x32, 0x01, 0x06, 0x07));

        let mut reader = NfcReader::new(transport, test_config());
        let version = reader.version_check().unwrap();
        assert_eq!(version.ic, 0x32);
        assert_eq!(version.ver, 0x01);
        assert_eq!(version.rev, 0x06);
        assert_eq!(version.support, 0x07);
        assert_eq!(reader.firmware_version(), Some(version));
    }

    #[test]
    fn test_ack_timeout_resends_same_command() {
        let mut transport = ScriptedTransport::new();
        transport
            .push_silence() // first ACK read times out
            .push_ack()
            .push_read(firmware_version_response(0x32, 0x01, 0x06, 0x07));

        let mut reader = NfcReader::new(transport, test_config());
        assert!(reader.version_check().is_some());

        let written = reader.transport.written();
        assert_eq!(written.len(), 2, "command must be resent after a lost ACK");
        assert_eq!(written[0], written[1]);
    }

    #[test]
    fn test_garbage_ack_counts_as_failed_attempt() {
        let mut transport = ScriptedTransport::new();
        transport
            .push_read(vec![0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00]) // NACK literal
            .push_ack()
            .push_read(firmware_version_response(0x32, 0x01, 0x06, 0x07));

        let mut reader = NfcReader::new(transport, test_config());
        assert!(reader.version_check().is_some());
        assert_eq!(reader.transport.written().len(), 2);
    }

    #[test]
    fn test_version_check_gives_up_after_bounded_attempts() {
        let mut transport = ScriptedTransport::new();
        for _ in 0..VERSION_EXCHANGE_ATTEMPTS {
            transport.push_silence();
        }

        let mut reader = NfcReader::new(transport, test_config());
        assert!(reader.version_check().is_none());
    }

    #[test]
    fn test_version_check_survives_corrupt_frame() {
        let mut corrupt = firmware_version_response(0x32, 0x01, 0x06, 0x07);
        let dcs_idx = corrupt.len() - 2;
        corrupt[dcs_idx] = corrupt[dcs_idx].wrapping_add(1);

        let mut transport = ScriptedTransport::new();
        transport
            .push_ack()
            .push_read(corrupt)
            .push_ack()
            .push_read(firmware_version_response(0x32, 0x01, 0x06, 0x07));

        let mut reader = NfcReader::new(transport, test_config());
        assert!(reader.version_check().is_some());
    }

    #[test]
    fn test_polling_refused_without_version() {
        let mut reader = NfcReader::new(ScriptedTransport::new(), test_config());
        let result = reader.start_polling(|_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(Error::NotReady(_))));
    }

    #[test]
    fn test_multi_target_report_tracks_first_only() {
        // Hand-build an InAutoPoll payload claiming two targets; only the
        // first is parsed and tracked.
        let mut transport = ScriptedTransport::new();
        transport
            .push_ack()
            .push_read(firmware_version_response(0x32, 0x01, 0x06, 0x07));

        let mut payload = auto_poll_single_response(&[0x04, 0x01, 0x02, 0x03]);
        // Patch the target count byte inside the framed payload (first body
        // byte after TFI + response code) and fix up the checksum.
        payload[7] = 0x02;
        let dcs_idx = payload.len() - 2;
        payload[dcs_idx] = payload[dcs_idx].wrapping_sub(1);
        transport.push_ack().push_read(payload);

        let mut reader = NfcReader::new(transport, test_config());
        reader.version_check().unwrap();

        let mut events = Vec::new();
        reader
            .start_polling(|event| {
                events.push(event);
                ControlFlow::Break(())
            })
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].nfcid, vec![0x04, 0x01, 0x02, 0x03]);
        assert!(events[0].in_field);
    }
}
