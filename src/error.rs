//! Error types for the driver framework.
//!
//! This module defines the primary error type, `DriverError`, used by every
//! instrument driver in the crate. Using the `thiserror` crate it gives a single,
//! consistent way to report the different things that can go wrong between a
//! logical attribute access and the bytes on the wire.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: a value is outside the declared domain of a descriptor. Raised
//!   locally, before any I/O, and never retried.
//! - **`UnsupportedForVariant`**: the descriptor belongs to a hardware personality other
//!   than the one detected on the device. Also raised before any I/O.
//! - **`NoGetSupport` / `NoSetSupport`**: the descriptor has no query or no write template.
//! - **`Transport`**: link-level failure (timeout, disconnection, I/O). Surfaced as-is; the
//!   core never retries.
//! - **`Parse`**: the device answered, but the response could not be decoded.
//! - **`DiscoveryAborted`**: a transport failure happened while probing capabilities.
//!
//! By using `#[from]`, `DriverError` can be created from the lower-level error types,
//! which keeps the `?` operator usable throughout the engine.

use std::time::Duration;

use thiserror::Error;

use crate::session::DeviceError;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Top-level error for descriptor access, channel routing and discovery.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Operation requires a {required} device, but the connected device is {actual}")]
    UnsupportedForVariant { required: String, actual: String },

    #[error("Descriptor '{0}' has no query command")]
    NoGetSupport(String),

    #[error("Descriptor '{0}' has no write command")]
    NoSetSupport(String),

    #[error("Unknown descriptor '{0}'")]
    UnknownDescriptor(String),

    #[error("Descriptor '{0}' is registered twice")]
    DuplicateDescriptor(String),

    #[error("Descriptor '{0}' has neither a query nor a write command")]
    EmptyDescriptor(String),

    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("Channel id '{0}' is used more than once")]
    DuplicateChannel(String),

    #[error("Channel '{0}' outlived its instrument")]
    ChannelDetached(String),

    #[error("Failed to render command template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to parse response '{response}': {message}")]
    Parse { response: String, message: String },

    #[error("Instrument did not acknowledge '{command}', responded with: {response}")]
    NotAcknowledged { command: String, response: String },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Capability discovery aborted at '{parameter}': {source}")]
    DiscoveryAborted {
        parameter: String,
        #[source]
        source: TransportError,
    },

    #[error("Instrument initialization failed: {0}")]
    Initialization(String),

    #[error("Instrument is not connected")]
    NotConnected,
}

impl DriverError {
    pub(crate) fn parse(response: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError::Parse {
            response: response.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before any byte reached the transport.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            DriverError::Validation(_)
                | DriverError::UnsupportedForVariant { .. }
                | DriverError::NoGetSupport(_)
                | DriverError::NoSetSupport(_)
                | DriverError::UnknownDescriptor(_)
                | DriverError::UnknownChannel(_)
                | DriverError::Template { .. }
        )
    }
}

/// A logical value fell outside the domain a codec declares.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{received} is not one of {allowed}")]
    NotInSet { allowed: String, received: String },

    #[error("{value} is out of range. Allowed range is [{min}, {max}]")]
    OutOfRange { min: f64, max: f64, value: f64 },

    #[error("expected {expected}, got {received}")]
    WrongType { expected: String, received: String },

    #[error("{received} rejected: {reason}")]
    Rejected { reason: String, received: String },
}

impl ValidationError {
    /// Human readable description of the domain the value should have been in.
    pub fn expected_domain(&self) -> String {
        match self {
            ValidationError::NotInSet { allowed, .. } => allowed.clone(),
            ValidationError::OutOfRange { min, max, .. } => format!("[{}, {}]", min, max),
            ValidationError::WrongType { expected, .. } => expected.clone(),
            ValidationError::Rejected { reason, .. } => reason.clone(),
        }
    }

    /// The offending value as it was received.
    pub fn received(&self) -> String {
        match self {
            ValidationError::NotInSet { received, .. }
            | ValidationError::WrongType { received, .. }
            | ValidationError::Rejected { received, .. } => received.clone(),
            ValidationError::OutOfRange { value, .. } => value.to_string(),
        }
    }
}

/// Link-level failures reported by a [`Transport`](crate::adapters::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timeout while waiting for the instrument ({0:?})")]
    Timeout(Duration),

    #[error("Connection to the instrument was lost")]
    Disconnected,

    #[error("Transport is not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}
