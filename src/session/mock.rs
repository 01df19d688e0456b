//! Mock session for testing
//!
//! A simulated key/value device: parameters it knows, parameters it refuses, and
//! controllable link failures. Clones share state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connector, DeviceError, Session};
use crate::error::TransportError;
use crate::value::Value;

#[derive(Default)]
struct MockSessionState {
    params: HashMap<String, Value>,
    rejected: HashMap<String, String>,
    gets: usize,
    sets: usize,
    fault_at: Option<usize>,
    closed: bool,
    close_count: usize,
    call_log: Vec<String>,
}

/// Mock session for testing
///
/// # Example
///
/// ```
/// use daq_instruments::session::{MockSession, Session};
/// use daq_instruments::value::Value;
///
/// let mock = MockSession::new().with_param("laser1:type", "CTL");
/// let mut session = mock.clone();
/// assert_eq!(session.get("laser1:type").unwrap(), Value::from("CTL"));
/// assert!(session.get("laser1:nope").is_err());
/// ```
#[derive(Clone, Default)]
pub struct MockSession {
    state: Arc<Mutex<MockSessionState>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(self, key: &str, value: impl Into<Value>) -> Self {
        self.state.lock().params.insert(key.to_string(), value.into());
        self
    }

    /// Known parameter whose reads and writes the device refuses.
    pub fn with_rejected(self, key: &str, reason: &str) -> Self {
        self.state
            .lock()
            .rejected
            .insert(key.to_string(), reason.to_string());
        self
    }

    /// Fail the `n`-th get (1-based, counted from now on) with a disconnect.
    pub fn inject_fault_at(&self, n: usize) {
        let mut state = self.state.lock();
        state.fault_at = Some(state.gets + n);
    }

    pub fn param(&self, key: &str) -> Option<Value> {
        self.state.lock().params.get(key).cloned()
    }

    pub fn get_count(&self) -> usize {
        self.state.lock().gets
    }

    pub fn set_count(&self) -> usize {
        self.state.lock().sets
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }
}

impl Session for MockSession {
    fn get(&mut self, key: &str) -> Result<Value, DeviceError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::NotConnected.into());
        }
        state.gets += 1;
        state.call_log.push(format!("get: {}", key));
        if state.fault_at == Some(state.gets) {
            state.fault_at = None;
            return Err(TransportError::Disconnected.into());
        }
        if let Some(reason) = state.rejected.get(key) {
            return Err(DeviceError::Rejected {
                name: key.to_string(),
                reason: reason.clone(),
            });
        }
        state
            .params
            .get(key)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownParameter {
                name: key.to_string(),
            })
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::NotConnected.into());
        }
        state.sets += 1;
        state.call_log.push(format!("set: {} {}", key, value));
        if let Some(reason) = state.rejected.get(key) {
            return Err(DeviceError::Rejected {
                name: key.to_string(),
                reason: reason.clone(),
            });
        }
        match state.params.get_mut(key) {
            Some(slot) => {
                *slot = value.clone();
                Ok(())
            }
            None => Err(DeviceError::UnknownParameter {
                name: key.to_string(),
            }),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.close_count += 1;
        }
        Ok(())
    }
}

/// Hands out clones of one [`MockSession`].
#[derive(Clone, Default)]
pub struct MockConnector {
    pub session: MockSession,
    pub fail_connect: bool,
}

impl MockConnector {
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            fail_connect: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            session: MockSession::new(),
            fail_connect: true,
        }
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    fn connect(&self) -> Result<MockSession, DeviceError> {
        if self.fail_connect {
            return Err(TransportError::NotConnected.into());
        }
        Ok(self.session.clone())
    }

    fn address(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_session_set_and_close() {
        let mock = MockSession::new().with_param("emission", false);
        let mut session = mock.clone();
        session.set("emission", &Value::Bool(true)).unwrap();
        assert_eq!(mock.param("emission"), Some(Value::Bool(true)));
        assert!(matches!(
            session.set("laser1:nope", &Value::Int(1)),
            Err(DeviceError::UnknownParameter { .. })
        ));
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(mock.close_count(), 1);
        assert!(session.get("emission").unwrap_err().is_transport());
    }

    #[test]
    fn test_mock_session_fault() {
        let mock = MockSession::new().with_param("a", 1);
        let mut session = mock.clone();
        mock.inject_fault_at(2);
        assert!(session.get("a").is_ok());
        assert!(session.get("a").unwrap_err().is_transport());
        assert!(session.get("a").is_ok());
    }
}
