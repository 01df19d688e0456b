//! Hardware personalities.
//!
//! Some drivers talk to devices that come in mutually exclusive flavours (a tunable
//! CTL laser head or a tapered amplifier behind the same controller, a 1x2 or a
//! 1x8 optical switch). The personality is determined once and never changes for
//! the life of the connection. Access to a variant-specific attribute is checked at
//! a single point before any I/O.

use std::fmt;

use tracing::info;

use crate::error::{DriverError, Result};

/// A closed set of hardware personalities, one of which is the fallback.
pub trait Variant: Copy + Eq + fmt::Debug + fmt::Display {
    /// Classify the raw identification string. Never fails; anything unmatched
    /// maps to [`Variant::unknown`].
    fn classify(raw: &str) -> Self;

    fn unknown() -> Self;
}

/// Detection state machine: `Uninitialized -> Detecting -> Detected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState<V> {
    Uninitialized,
    Detecting,
    /// Terminal for the connection.
    Detected(V),
}

/// Holds the detected personality of one connection.
#[derive(Debug, Clone)]
pub struct VariantGate<V: Variant> {
    state: GateState<V>,
    raw: Option<String>,
}

impl<V: Variant> Default for VariantGate<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Variant> VariantGate<V> {
    pub fn new() -> Self {
        Self {
            state: GateState::Uninitialized,
            raw: None,
        }
    }

    pub fn state(&self) -> GateState<V> {
        self.state
    }

    /// Run the identification query and classify the answer.
    ///
    /// Once a variant is detected, later calls return it without querying again.
    /// A failed query leaves the gate uninitialized.
    pub fn detect<E, F>(&mut self, query: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<String, E>,
    {
        if let GateState::Detected(variant) = self.state {
            return Ok(variant);
        }
        self.state = GateState::Detecting;
        match query() {
            Ok(raw) => {
                let variant = V::classify(raw.trim());
                info!(raw = %raw.trim(), variant = %variant, "Detected device variant");
                self.raw = Some(raw.trim().to_string());
                self.state = GateState::Detected(variant);
                Ok(variant)
            }
            Err(e) => {
                self.state = GateState::Uninitialized;
                Err(e)
            }
        }
    }

    /// The detected variant, if detection has completed.
    pub fn current(&self) -> Option<V> {
        match self.state {
            GateState::Detected(v) => Some(v),
            _ => None,
        }
    }

    /// The identification string the device reported.
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Fail unless the detected variant is `required`.
    pub fn require(&self, required: V) -> Result<()> {
        match self.current() {
            Some(actual) if actual == required => Ok(()),
            Some(actual) => Err(DriverError::UnsupportedForVariant {
                required: required.to_string(),
                actual: actual.to_string(),
            }),
            None => Err(DriverError::UnsupportedForVariant {
                required: required.to_string(),
                actual: "Uninitialized".to_string(),
            }),
        }
    }
}

/// Gate check for descriptor based instruments, where variants are named.
pub fn ensure_variant(required: Option<&str>, actual: Option<&str>) -> Result<()> {
    match required {
        None => Ok(()),
        Some(required) if actual == Some(required) => Ok(()),
        Some(required) => Err(DriverError::UnsupportedForVariant {
            required: required.to_string(),
            actual: actual.unwrap_or("Unknown").to_string(),
        }),
    }
}
