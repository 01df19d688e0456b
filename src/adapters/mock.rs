//! Mock transport for testing
//!
//! Simulates a device on the other end of the link without any hardware. It provides:
//! - Scripted responses keyed by the request text
//! - Write/read counters and a call log for test verification
//! - Controllable fault injection and disconnect simulation
//!
//! The handle is cheap to clone; clones share state, so a test can keep one handle
//! while the instrument owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Framing, Transport, DEFAULT_TIMEOUT};
use crate::error::TransportError;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Default)]
struct MockState {
    replies: HashMap<String, Reply>,
    default_reply: Option<String>,
    /// Bytes waiting to be read by the driver.
    pending: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    call_log: Vec<String>,
    writes: usize,
    reads: usize,
    exchanges: usize,
    fault_at: Option<usize>,
    disconnected: bool,
}

/// Mock transport for testing
///
/// # Example
///
/// ```
/// use daq_instruments::adapters::{MockTransport, Transport};
///
/// let mock = MockTransport::new().with_reply("*IDN?", "Siglent,SDG1032X,1234,1.01");
/// let mut transport = mock.clone();
/// assert_eq!(transport.ask("*IDN?").unwrap(), "Siglent,SDG1032X,1234,1.01");
/// assert_eq!(mock.write_count(), 1);
/// ```
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    framing: Framing,
    timeout: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            framing: Framing::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Answer `request` with the text line `response`.
    pub fn with_reply(self, request: &str, response: &str) -> Self {
        self.set_reply(request, response);
        self
    }

    /// Answer `request` with raw bytes (no termination appended).
    pub fn with_binary_reply(self, request: &str, response: &[u8]) -> Self {
        self.state
            .lock()
            .replies
            .insert(request.to_string(), Reply::Bytes(response.to_vec()));
        self
    }

    /// Answer every unscripted text request with `response`.
    pub fn with_default_reply(self, response: &str) -> Self {
        self.state.lock().default_reply = Some(response.to_string());
        self
    }

    pub fn set_reply(&self, request: &str, response: &str) {
        self.state
            .lock()
            .replies
            .insert(request.to_string(), Reply::Text(response.to_string()));
    }

    /// Fail the `n`-th write (1-based, counted from now on) with a disconnect.
    pub fn inject_fault_at(&self, n: usize) {
        let mut state = self.state.lock();
        state.fault_at = Some(state.exchanges + n);
    }

    /// Simulate a dropped link: every later call fails.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    /// Every payload written, terminations included.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Text requests and frames, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.call_log.clear();
        state.written.clear();
    }

    fn record_write(&self, entry: String, raw: Vec<u8>) -> Result<MutexGuardState<'_>, TransportError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        state.exchanges += 1;
        if state.fault_at == Some(state.exchanges) {
            state.fault_at = None;
            state.call_log.push(format!("{} (fault)", entry));
            return Err(TransportError::Disconnected);
        }
        state.writes += 1;
        state.call_log.push(entry);
        state.written.push(raw);
        Ok(state)
    }
}

type MutexGuardState<'a> = parking_lot::MutexGuard<'a, MockState>;

impl Transport for MockTransport {
    fn write_bytes(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.record_write(format!("write_bytes: {:02X?}", payload), payload.to_vec())?;
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        state.reads += 1;
        if state.pending.len() < n {
            return Err(TransportError::Timeout(self.timeout));
        }
        Ok(state.pending.drain(..n).collect())
    }

    fn write_text(&mut self, text: &str) -> Result<(), TransportError> {
        let raw = format!("{}{}", text, self.framing.write_termination).into_bytes();
        let read_term = self.framing.read_termination.clone();
        let mut state = self.record_write(format!("write: {}", text), raw)?;
        let reply = state
            .replies
            .get(text)
            .cloned()
            .or_else(|| state.default_reply.clone().map(Reply::Text));
        match reply {
            Some(Reply::Text(line)) => {
                state.pending.extend(line.bytes());
                state.pending.extend(read_term.bytes());
            }
            Some(Reply::Bytes(bytes)) => state.pending.extend(bytes),
            None => {}
        }
        Ok(())
    }

    fn read_text(&mut self) -> Result<String, TransportError> {
        let term = self.framing.read_termination.as_bytes().to_vec();
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        state.reads += 1;
        let buffered: Vec<u8> = state.pending.iter().copied().collect();
        let end = buffered
            .windows(term.len().max(1))
            .position(|w| w == term.as_slice())
            .ok_or(TransportError::Timeout(self.timeout))?;
        state.pending.drain(..end + term.len());
        let line = String::from_utf8_lossy(&buffered[..end]).trim().to_string();
        state.call_log.push(format!("read: {}", line));
        Ok(line)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
