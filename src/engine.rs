//! The command engine: attribute access to wire exchange and back.
//!
//! The engine is stateless. Every call receives the transport, the descriptor and
//! the channel it operates on, performs exactly one exchange and returns. Anything
//! that has to be remembered between calls (the last selected switch channel, for
//! example) belongs to the instrument.
//!
//! Ordering inside a call is fixed:
//! 1. template presence check (`NoGetSupport` / `NoSetSupport`)
//! 2. value validation and encoding
//! 3. template rendering
//! 4. I/O
//!
//! Steps 1 to 3 can fail without touching the transport.

use tracing::debug;

use crate::adapters::Transport;
use crate::channel::ChannelId;
use crate::codec::ValueCodec;
use crate::descriptor::{Descriptor, WireCommand};
use crate::error::{DriverError, Result};
use crate::parser::Parsed;
use crate::value::Value;

/// Executes descriptors against a transport.
pub struct CommandEngine;

impl CommandEngine {
    /// Query the device and decode the response.
    pub fn get(
        transport: &mut dyn Transport,
        descriptor: &Descriptor,
        channel: Option<&ChannelId>,
    ) -> Result<Value> {
        let query = descriptor.render_query(channel)?;
        debug!(descriptor = %descriptor.name, command = %query, "Query");
        transport.write_text(&query)?;
        let parsed = descriptor.parser.read_from(transport)?;
        decode(parsed, &descriptor.codec)
    }

    /// Validate, encode and write `value`.
    ///
    /// An invalid value fails with [`DriverError::Validation`] before anything is
    /// written. No response is read unless the descriptor declares an acknowledgement.
    pub fn set(
        transport: &mut dyn Transport,
        descriptor: &Descriptor,
        channel: Option<&ChannelId>,
        value: &Value,
    ) -> Result<()> {
        if descriptor.set.is_none() {
            return Err(DriverError::NoSetSupport(descriptor.name.clone()));
        }
        let wire = descriptor.codec.encode(value)?;
        let command = descriptor.render_write(channel, Some(&wire))?;
        send(transport, descriptor, command)
    }

    /// Send a value-less write, e.g. `*RST` or `:ABORt`.
    pub fn execute(
        transport: &mut dyn Transport,
        descriptor: &Descriptor,
        channel: Option<&ChannelId>,
    ) -> Result<()> {
        let command = descriptor.render_write(channel, None)?;
        send(transport, descriptor, command)
    }
}

fn send(transport: &mut dyn Transport, descriptor: &Descriptor, command: WireCommand) -> Result<()> {
    let sent = match command {
        WireCommand::Text(text) => {
            debug!(descriptor = %descriptor.name, command = %text, "Write");
            transport.write_text(&text)?;
            text
        }
        WireCommand::Frame(frame) => {
            debug!(descriptor = %descriptor.name, frame = ?frame, "Write frame");
            transport.write_bytes(&frame)?;
            format!("{:02X?}", frame)
        }
    };

    if let Some(expected) = &descriptor.ack {
        let response = transport.read_text()?;
        if response != *expected {
            return Err(DriverError::NotAcknowledged {
                command: sent,
                response,
            });
        }
    }
    Ok(())
}

fn decode(parsed: Parsed, codec: &ValueCodec) -> Result<Value> {
    match parsed {
        Parsed::Token(token) => codec.decode(&token),
        Parsed::Tokens(tokens) => tokens
            .iter()
            .map(|t| codec.decode(t))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Parsed::Default(value) => Ok(value),
        Parsed::Samples(samples) => Ok(Value::List(samples)),
        Parsed::Block(block) => Ok(Value::Map(block)),
    }
}
