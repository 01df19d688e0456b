//! Vendor SDK session contract.
//!
//! Some controllers are not driven through command templates at all but through a
//! key/value API (the Toptica DeCoP interface is the example here). The drivers
//! built on top of it only need three operations, [`Session::get`], [`Session::set`]
//! and [`Session::close`], plus a [`Connector`] that opens a session.
//!
//! [`DeviceError`] separates what capability discovery must tell apart: a device that
//! does not know a parameter, a device that refuses a request, and a dead link.

pub mod decop;
pub mod mock;

use thiserror::Error;

use crate::error::TransportError;
use crate::value::Value;

pub use decop::{DecopConnector, DecopSession};
pub use mock::{MockConnector, MockSession};

/// Errors reported through the session contract.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Unknown parameter '{name}'")]
    UnknownParameter { name: String },

    #[error("Device rejected '{name}': {reason}")]
    Rejected { name: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl DeviceError {
    /// True for link-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, DeviceError::Transport(_))
    }
}

/// An open key/value connection to a device.
pub trait Session: Send {
    fn get(&mut self, key: &str) -> Result<Value, DeviceError>;

    fn set(&mut self, key: &str, value: &Value) -> Result<(), DeviceError>;

    /// Close the connection. Closing twice is not an error.
    fn close(&mut self) -> Result<(), DeviceError>;
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn get(&mut self, key: &str) -> Result<Value, DeviceError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), DeviceError> {
        (**self).set(key, value)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        (**self).close()
    }
}

/// Opens sessions.
pub trait Connector {
    type Session: Session;

    fn connect(&self) -> Result<Self::Session, DeviceError>;

    /// Address shown in logs and metadata.
    fn address(&self) -> String;
}
