//! DeCoP command line session.
//!
//! Toptica controllers expose their parameter tree on a text port (1998 by default)
//! speaking a small Scheme dialect:
//!
//! ```text
//! > (param-ref 'laser1:type)
//! "CTL"
//! > (param-set! 'emission #t)
//! 0
//! > (param-ref 'laser1:nope)
//! Error: -10 unknown parameter
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use super::{Connector, DeviceError, Session};
use crate::adapters::{connect_tcp, Framing, TcpTransport, Transport, DEFAULT_TIMEOUT};
use crate::error::TransportError;
use crate::value::Value;

/// Default DeCoP command line port.
pub const DECOP_PORT: u16 = 1998;

const UNKNOWN_PARAMETER: &str = r"(?i)unknown parameter|no such parameter|parameter not found";

fn unknown_parameter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(UNKNOWN_PARAMETER).expect("UNKNOWN_PARAMETER is a valid pattern")
    })
}

/// [`Session`] over a DeCoP text transport.
pub struct DecopSession<T: Transport> {
    transport: Option<T>,
}

impl<T: Transport> DecopSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn exchange(&mut self, key: &str, command: &str) -> Result<String, DeviceError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(DeviceError::Transport(TransportError::NotConnected))?;
        let response = transport.ask(command)?;
        let response = strip_prompt(&response);
        debug!(key, response, "DeCoP response");
        if let Some(reason) = response.strip_prefix("Error:") {
            return Err(classify_error(key, reason.trim()));
        }
        Ok(response.to_string())
    }
}

impl<T: Transport> Session for DecopSession<T> {
    fn get(&mut self, key: &str) -> Result<Value, DeviceError> {
        let response = self.exchange(key, &format!("(param-ref '{})", key))?;
        Ok(parse_literal(&response))
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), DeviceError> {
        let command = format!("(param-set! '{} {})", key, to_literal(value));
        let response = self.exchange(key, &command)?;
        match response.parse::<i64>() {
            Ok(code) if code < 0 => Err(DeviceError::Rejected {
                name: key.to_string(),
                reason: format!("error code {}", code),
            }),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.transport.take().is_some() {
            info!("DeCoP session closed");
        }
        Ok(())
    }
}

fn strip_prompt(line: &str) -> &str {
    let mut line = line.trim();
    while let Some(rest) = line.strip_prefix('>') {
        line = rest.trim_start();
    }
    line
}

fn classify_error(key: &str, reason: &str) -> DeviceError {
    if unknown_parameter_pattern().is_match(reason) {
        DeviceError::UnknownParameter {
            name: key.to_string(),
        }
    } else {
        DeviceError::Rejected {
            name: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Decode a DeCoP literal: `#t`/`#f`, numbers, quoted strings.
pub fn parse_literal(token: &str) -> Value {
    let token = token.trim();
    match token {
        "#t" => Value::Bool(true),
        "#f" => Value::Bool(false),
        _ => match token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            Some(text) => Value::Text(text.replace("\\\"", "\"").replace("\\\\", "\\")),
            None => Value::infer(token),
        },
    }
}

/// Encode a value as a DeCoP literal.
pub fn to_literal(value: &Value) -> String {
    match value {
        Value::Bool(true) => "#t".to_string(),
        Value::Bool(false) => "#f".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        other => format!(
            "\"{}\"",
            other.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        ),
    }
}

/// Opens [`DecopSession`]s over TCP.
#[derive(Debug, Clone)]
pub struct DecopConnector {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl DecopConnector {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DECOP_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Connector for DecopConnector {
    type Session = DecopSession<TcpTransport>;

    fn connect(&self) -> Result<Self::Session, DeviceError> {
        let transport = connect_tcp(&self.host, self.port, Framing::default(), self.timeout)?;
        Ok(DecopSession::new(transport))
    }

    fn address(&self) -> String {
        self.host.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    #[test]
    fn test_get_parses_literals() {
        let mock = MockTransport::new()
            .with_reply("(param-ref 'laser1:type)", "> \"CTL\"")
            .with_reply("(param-ref 'emission)", "#t")
            .with_reply("(param-ref 'laser1:ctl:wavelength-act)", "1550.12");
        let mut session = DecopSession::new(mock);
        assert_eq!(session.get("laser1:type").unwrap(), Value::from("CTL"));
        assert_eq!(session.get("emission").unwrap(), Value::Bool(true));
        assert_eq!(
            session.get("laser1:ctl:wavelength-act").unwrap(),
            Value::Float(1550.12)
        );
    }

    #[test]
    fn test_error_classification() {
        let mock = MockTransport::new()
            .with_reply("(param-ref 'system:model)", "Error: -10 unknown parameter")
            .with_reply("(param-set! 'laser1:type \"TA\")", "Error: -7 parameter is read-only");
        let mut session = DecopSession::new(mock);
        assert!(matches!(
            session.get("system:model"),
            Err(DeviceError::UnknownParameter { .. })
        ));
        assert!(matches!(
            session.set("laser1:type", &Value::from("TA")),
            Err(DeviceError::Rejected { .. })
        ));
    }

    #[test]
    fn test_set_and_close() {
        let mock = MockTransport::new().with_reply("(param-set! 'emission #f)", "0");
        let mut session = DecopSession::new(mock.clone());
        session.set("emission", &Value::Bool(false)).unwrap();
        assert!(session.is_open());
        session.close().unwrap();
        session.close().unwrap();
        assert!(!session.is_open());
        assert!(matches!(
            session.get("emission"),
            Err(DeviceError::Transport(TransportError::NotConnected))
        ));
        assert_eq!(mock.write_count(), 1);
    }

    #[test]
    fn test_unknown_parameter_pattern() {
        let pattern = unknown_parameter_pattern();
        assert!(pattern.is_match("-10 Unknown Parameter"));
        assert!(pattern.is_match("no such parameter"));
        assert!(pattern.is_match("parameter not found"));
        assert!(!pattern.is_match("-7 parameter is read-only"));
    }

    #[test]
    fn test_link_failure_is_transport() {
        let mock = MockTransport::new();
        mock.disconnect();
        let mut session = DecopSession::new(mock);
        assert!(session.get("emission").unwrap_err().is_transport());
    }
}
