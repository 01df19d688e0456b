//! Command descriptors.
//!
//! A [`Descriptor`] binds a logical attribute name to its query template, its write
//! command, a [`ValueCodec`] and a [`ResponseParser`]. Descriptors are plain data,
//! built once when a driver is constructed and shared read-only through a
//! [`DescriptorTable`] by every channel of that instrument.
//!
//! Templates are rendered with `strfmt`: `{ch}` (or `{channel}`) is the channel id
//! and `{value}` the encoded wire value.
//!
//! ```
//! use daq_instruments::codec::ValueCodec;
//! use daq_instruments::descriptor::Descriptor;
//!
//! let mode = Descriptor::control("mode", ":TRACe{ch}:MODE?", ":TRACe{ch}:MODE {value}")
//!     .with_codec(ValueCodec::discrete(["WRITe", "MAXHold", "BLANk"]));
//! assert!(mode.get_template.is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::ChannelId;
use crate::codec::{ValueCodec, ValueKind};
use crate::error::{DriverError, Result};
use crate::parser::ResponseParser;
use crate::value::Value;

/// Fixed 4-byte binary command `[opcode_hi, opcode_lo, reserved, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTemplate {
    pub opcode: u16,
    pub reserved: u8,
}

impl FrameTemplate {
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            reserved: 0x00,
        }
    }

    /// Build the frame for an encoded value, which must fit in one byte.
    pub fn render(&self, value: &Value) -> Result<[u8; 4]> {
        let byte = value
            .as_i64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| DriverError::Template {
                template: format!("frame {:#06x}", self.opcode),
                message: format!("value {} does not fit in one byte", value),
            })?;
        let [hi, lo] = self.opcode.to_be_bytes();
        Ok([hi, lo, self.reserved, byte])
    }
}

/// How a descriptor writes to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum SetCommand {
    Text(String),
    Frame(FrameTemplate),
}

/// A rendered write, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum WireCommand {
    Text(String),
    Frame([u8; 4]),
}

/// Static definition of one attribute.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    pub get_template: Option<String>,
    pub set: Option<SetCommand>,
    pub codec: ValueCodec,
    pub parser: ResponseParser,
    /// Hardware personality this descriptor is restricted to.
    pub required_variant: Option<String>,
    /// Line the device sends back after a write, if the protocol echoes.
    pub ack: Option<String>,
}

impl Descriptor {
    /// Build a descriptor from optional templates.
    ///
    /// Fails with [`DriverError::EmptyDescriptor`] when neither a query nor a write
    /// command is given.
    pub fn new(
        name: impl Into<String>,
        get_template: Option<String>,
        set: Option<SetCommand>,
    ) -> Result<Self> {
        let name = name.into();
        if get_template.is_none() && set.is_none() {
            return Err(DriverError::EmptyDescriptor(name));
        }
        Ok(Self {
            name,
            get_template,
            set,
            codec: ValueCodec::any(ValueKind::Auto),
            parser: ResponseParser::default(),
            required_variant: None,
            ack: None,
        })
    }

    /// Readable and writable attribute.
    pub fn control(name: &str, get: &str, set: &str) -> Self {
        Self::from_parts(name, Some(get), Some(SetCommand::Text(set.to_string())))
    }

    /// Read-only attribute.
    pub fn measurement(name: &str, get: &str) -> Self {
        Self::from_parts(name, Some(get), None)
    }

    /// Write-only attribute or command.
    pub fn setting(name: &str, set: &str) -> Self {
        Self::from_parts(name, None, Some(SetCommand::Text(set.to_string())))
    }

    /// Write-only attribute sent as a binary frame.
    pub fn frame(name: &str, frame: FrameTemplate) -> Self {
        Self::from_parts(name, None, Some(SetCommand::Frame(frame)))
    }

    fn from_parts(name: &str, get: Option<&str>, set: Option<SetCommand>) -> Self {
        Self {
            name: name.to_string(),
            get_template: get.map(str::to_string),
            set,
            codec: ValueCodec::any(ValueKind::Auto),
            parser: ResponseParser::default(),
            required_variant: None,
            ack: None,
        }
    }

    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    /// Restrict the descriptor to one hardware personality.
    pub fn for_variant(mut self, variant: &str) -> Self {
        self.required_variant = Some(variant.to_string());
        self
    }

    pub fn with_ack(mut self, ack: &str) -> Self {
        self.ack = Some(ack.to_string());
        self
    }

    /// Render the query for `channel`.
    pub fn render_query(&self, channel: Option<&ChannelId>) -> Result<String> {
        let template = self
            .get_template
            .as_deref()
            .ok_or_else(|| DriverError::NoGetSupport(self.name.clone()))?;
        render(template, channel, None)
    }

    /// Render the write command for `channel`. `wire` is the already encoded value;
    /// `None` for value-less settings.
    pub fn render_write(
        &self,
        channel: Option<&ChannelId>,
        wire: Option<&Value>,
    ) -> Result<WireCommand> {
        match &self.set {
            None => Err(DriverError::NoSetSupport(self.name.clone())),
            Some(SetCommand::Text(template)) => {
                render(template, channel, wire).map(WireCommand::Text)
            }
            Some(SetCommand::Frame(frame)) => {
                let value = wire.ok_or_else(|| DriverError::Template {
                    template: format!("frame {:#06x}", frame.opcode),
                    message: "binary frames need a value".to_string(),
                })?;
                frame.render(value).map(WireCommand::Frame)
            }
        }
    }
}

fn render(template: &str, channel: Option<&ChannelId>, wire: Option<&Value>) -> Result<String> {
    let mut vars: HashMap<String, String> = HashMap::new();
    if let Some(ch) = channel {
        vars.insert("ch".to_string(), ch.to_string());
        vars.insert("channel".to_string(), ch.to_string());
    }
    if let Some(value) = wire {
        vars.insert("value".to_string(), value.to_string());
    }
    strfmt::strfmt(template, &vars).map_err(|e| DriverError::Template {
        template: template.to_string(),
        message: e.to_string(),
    })
}

/// Named descriptors of one driver, in registration order.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    descriptors: Vec<Descriptor>,
    index: HashMap<String, usize>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, failing on the first duplicate name.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = Descriptor>) -> Result<Self> {
        let mut table = Self::new();
        for descriptor in descriptors {
            table.register(descriptor)?;
        }
        Ok(table)
    }

    pub fn register(&mut self, descriptor: Descriptor) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(DriverError::DuplicateDescriptor(descriptor.name));
        }
        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Descriptor> {
        self.index
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| DriverError::UnknownDescriptor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
