//! Byte transport abstraction between the driver and the serial line.
//!
//! The reader contract is deliberately small: write a buffer, or read up to
//! `n` bytes within a timeout. A timed-out read returns however many bytes
//! arrived (possibly none); it never blocks indefinitely and never turns a
//! timeout into an error. The driver layers its own retry semantics on top.

use std::io::{Read, Write};
use std::time::Duration;

use fieldlink_core::{Error, Result};
use tracing::debug;

/// Blocking byte stream to the reader.
pub trait ByteTransport {
    /// Write the whole buffer.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `n` bytes, waiting at most `timeout`.
    ///
    /// Returns fewer than `n` bytes (possibly zero) when the timeout
    /// expires first; hard I/O failures are the only error case.
    fn read_bytes(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>>;
}

/// [`ByteTransport`] over a real serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate.
    ///
    /// # Errors
    /// Returns `Error::Transport` when the port cannot be opened.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| Error::Transport(format!("{path}: {e}")))?;
        debug!(port = path, baud, "Serial port opened");
        Ok(Self { port })
    }
}

impl ByteTransport for SerialTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn read_bytes(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| Error::Transport(e.to_string()))?;

        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(k) => filled += k,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
