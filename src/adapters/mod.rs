//! Transport adapters
//!
//! The [`Transport`] trait is the only thing the command engine knows about the
//! physical link: a blocking byte/line duplex with a timeout. [`FramedIo`] implements
//! line framing once, over any `Read + Write` stream, and the serial and TCP adapters
//! are thin constructors around it.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod tcp;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::TransportError;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::{open_serial, SerialTransport};
pub use tcp::{connect_tcp, TcpTransport};

/// Default timeout for a single exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Blocking byte/line duplex to one physical device.
///
/// Every call blocks until it completes or the configured timeout elapses.
/// Implementations never retry.
pub trait Transport: Send {
    /// Write raw bytes, no termination appended.
    fn write_bytes(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Read exactly `n` bytes.
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError>;

    /// Write `text` followed by the write termination.
    fn write_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Read up to and including the read termination. The returned line is trimmed.
    fn read_text(&mut self) -> Result<String, TransportError>;

    fn ask(&mut self, command: &str) -> Result<String, TransportError> {
        self.write_text(command)?;
        self.read_text()
    }

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_bytes(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        (**self).write_bytes(payload)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_bytes(n)
    }

    fn write_text(&mut self, text: &str) -> Result<(), TransportError> {
        (**self).write_text(text)
    }

    fn read_text(&mut self) -> Result<String, TransportError> {
        (**self).read_text()
    }

    fn ask(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).ask(command)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }
}

/// Line terminations for text exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub read_termination: String,
    pub write_termination: String,
}

impl Framing {
    pub fn new(read_termination: impl Into<String>, write_termination: impl Into<String>) -> Self {
        Self {
            read_termination: read_termination.into(),
            write_termination: write_termination.into(),
        }
    }

    /// `\r\n` in both directions.
    pub fn crlf() -> Self {
        Self::new("\r\n", "\r\n")
    }
}

impl Default for Framing {
    fn default() -> Self {
        Self::new("\n", "\n")
    }
}

/// Framing and timeout handling over any blocking byte stream.
///
/// The stream's own read timeout should be short; `FramedIo` keeps polling until
/// its overall deadline passes and then fails with [`TransportError::Timeout`].
pub struct FramedIo<S> {
    stream: S,
    framing: Framing,
    timeout: Duration,
    /// Bytes received past the last terminator.
    pending: Vec<u8>,
}

impl<S: Read + Write + Send> FramedIo<S> {
    pub fn new(stream: S, framing: Framing, timeout: Duration) -> Self {
        Self {
            stream,
            framing,
            timeout,
            pending: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Pull one chunk from the stream into `pending`.
    fn fill(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let mut chunk = [0u8; 256];
        loop {
            if Instant::now() > deadline {
                return Err(TransportError::Timeout(self.timeout));
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                // Port timeout is shorter than our overall timeout
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<S: Read + Write + Send> Transport for FramedIo<S> {
    fn write_bytes(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        debug!(bytes = ?payload, "Sending frame");
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.timeout;
        while self.pending.len() < n {
            self.fill(deadline)?;
        }
        let rest = self.pending.split_off(n);
        Ok(std::mem::replace(&mut self.pending, rest))
    }

    fn write_text(&mut self, text: &str) -> Result<(), TransportError> {
        debug!(command = text, "Sending command");
        let line = format!("{}{}", text, self.framing.write_termination);
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_text(&mut self) -> Result<String, TransportError> {
        let deadline = Instant::now() + self.timeout;
        let term = self.framing.read_termination.as_bytes().to_vec();
        loop {
            if let Some(end) = find_terminator(&self.pending, &term) {
                let rest = self.pending.split_off(end + term.len());
                let line = std::mem::replace(&mut self.pending, rest);
                let response = String::from_utf8_lossy(&line).trim().to_string();
                debug!(response = %response, "Received response");
                return Ok(response);
            }
            self.fill(deadline)?;
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

fn find_terminator(haystack: &[u8], term: &[u8]) -> Option<usize> {
    if term.is_empty() {
        return None;
    }
    haystack.windows(term.len()).position(|w| w == term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory stream: reads from a canned buffer, records writes.
    struct Loopback {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Yields its canned bytes, then only read timeouts, like a silent port.
    struct Stalled {
        input: Cursor<Vec<u8>>,
    }

    impl Read for Stalled {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.input.read(buf)? {
                0 => {
                    std::thread::sleep(Duration::from_millis(1));
                    Err(std::io::Error::new(ErrorKind::TimedOut, "port timeout"))
                }
                n => Ok(n),
            }
        }
    }

    impl Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn stalled(input: &[u8]) -> FramedIo<Stalled> {
        FramedIo::new(
            Stalled {
                input: Cursor::new(input.to_vec()),
            },
            Framing::crlf(),
            Duration::from_millis(30),
        )
    }

    fn framed(input: &[u8]) -> FramedIo<Loopback> {
        FramedIo::new(
            Loopback {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            },
            Framing::crlf(),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_read_text_splits_on_terminator() {
        let mut io = framed(b"first\r\nsecond\r\n");
        assert_eq!(io.read_text().unwrap(), "first");
        assert_eq!(io.read_text().unwrap(), "second");
        assert!(matches!(io.read_text(), Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_silent_device_times_out() {
        let mut io = stalled(b"");
        assert!(matches!(io.read_text(), Err(TransportError::Timeout(_))));
        assert!(matches!(io.read_bytes(4), Err(TransportError::Timeout(_))));
    }

    #[test]
    fn test_partial_line_times_out() {
        let mut io = stalled(b"ON,LOAD");
        assert!(matches!(io.read_text(), Err(TransportError::Timeout(_))));

        let mut io = stalled(b"\x04\x00");
        assert!(matches!(io.read_bytes(4), Err(TransportError::Timeout(_))));
    }

    #[test]
    fn test_write_text_appends_termination() {
        let mut io = framed(b"");
        io.write_text("*IDN?").unwrap();
        io.write_bytes(&[0x01, 0x12]).unwrap();
        assert_eq!(io.get_ref().output, b"*IDN?\r\n\x01\x12");
    }

    #[test]
    fn test_read_bytes_uses_leftover() {
        let mut io = framed(b"OK\r\n\x04\x00\x00\x00");
        assert_eq!(io.read_text().unwrap(), "OK");
        assert_eq!(io.read_bytes(4).unwrap(), vec![4, 0, 0, 0]);
    }
}
