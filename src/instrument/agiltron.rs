//! Agiltron optical switch (1x2 and 1x8)
//!
//! The two switch types speak different protocols over the same RS-232 settings
//! (9600 baud, 8N1, `\r\n`):
//!
//! - **1x2**: 4-byte binary frame `[0x01, 0x12, 0x00, channel]`, no reply.
//! - **1x8**: text command `*SW00<channel>`, plus `*PN` / `*SN` identity queries.
//!
//! Neither type can report the selected channel, so the driver remembers the last
//! channel it switched to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{discover_descriptors, Driver, Instrument};
use crate::adapters::Transport;
use crate::codec::{ValueCodec, ValueKind};
use crate::descriptor::{Descriptor, DescriptorTable, FrameTemplate};
use crate::discovery::CapabilitySnapshot;
use crate::error::{DriverError, Result, ValidationError};
use crate::value::Value;

/// Opcode of the 1x2 channel select frame.
const SELECT_OPCODE: u16 = 0x0112;

/// Default line settings for both switch types.
pub const BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchType {
    #[serde(rename = "1x2")]
    OneByTwo,
    #[serde(rename = "1x8")]
    OneByEight,
}

impl SwitchType {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchType::OneByTwo => "1x2",
            SwitchType::OneByEight => "1x8",
        }
    }

    pub fn channel_count(self) -> u8 {
        match self {
            SwitchType::OneByTwo => 2,
            SwitchType::OneByEight => 8,
        }
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwitchType {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1x2" => Ok(SwitchType::OneByTwo),
            "1x8" => Ok(SwitchType::OneByEight),
            other => Err(ValidationError::NotInSet {
                allowed: "{1x2, 1x8}".to_string(),
                received: other.to_string(),
            }
            .into()),
        }
    }
}

/// Product name and serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub product: String,
    pub serial: String,
}

impl Identity {
    fn unknown() -> Self {
        Self {
            product: "Unknown".to_string(),
            serial: "Unknown".to_string(),
        }
    }
}

fn descriptors(switch_type: SwitchType) -> Result<DescriptorTable> {
    let range = ValueCodec::int_range(1, switch_type.channel_count() as i64);
    let channel = match switch_type {
        SwitchType::OneByTwo => Descriptor::frame("channel", FrameTemplate::new(SELECT_OPCODE))
            .with_codec(range)
            .for_variant("1x2"),
        SwitchType::OneByEight => Descriptor::setting("channel", "*SW00{value}")
            .with_codec(range)
            .for_variant("1x8"),
    };
    DescriptorTable::from_descriptors([
        channel,
        Descriptor::measurement("product_name", "*PN")
            .with_codec(ValueCodec::any(ValueKind::Text))
            .for_variant("1x8"),
        Descriptor::measurement("serial_number", "*SN")
            .with_codec(ValueCodec::any(ValueKind::Text))
            .for_variant("1x8"),
    ])
}

/// Agiltron 1x2 / 1x8 optical switch.
pub struct AgiltronSwitch {
    inner: Instrument,
    switch_type: SwitchType,
    current_channel: Option<u8>,
    identity: Identity,
}

impl AgiltronSwitch {
    /// Wrap an open transport. For a 1x8 switch the identity is queried once; a
    /// failure there is logged and recorded as "Unknown".
    pub fn new<T: Transport + 'static>(transport: T, switch_type: SwitchType) -> Result<Self> {
        let inner = Instrument::new("Agiltron Optical Switch", transport, descriptors(switch_type)?)
            .with_variant(switch_type.as_str());

        let identity = match switch_type {
            SwitchType::OneByTwo => Identity {
                product: "Agiltron 1x2 Switch".to_string(),
                serial: "Unknown".to_string(),
            },
            SwitchType::OneByEight => match Self::query_identity(&inner) {
                Ok(identity) => {
                    info!(product = %identity.product, serial = %identity.serial, "Connected to switch");
                    identity
                }
                Err(e) => {
                    warn!(error = %e, "Could not retrieve device ID");
                    Identity::unknown()
                }
            },
        };

        Ok(Self {
            inner,
            switch_type,
            current_channel: None,
            identity,
        })
    }

    /// Open the switch on a serial port with its default line settings.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port: &str, switch_type: SwitchType) -> Result<Self> {
        let transport = crate::adapters::open_serial(
            port,
            BAUD_RATE,
            crate::adapters::Framing::crlf(),
            crate::adapters::DEFAULT_TIMEOUT,
        )?;
        Self::new(transport, switch_type)
    }

    fn query_identity(inner: &Instrument) -> Result<Identity> {
        Ok(Identity {
            product: inner.get("product_name")?.to_string(),
            serial: inner.get("serial_number")?.to_string(),
        })
    }

    pub fn switch_type(&self) -> SwitchType {
        self.switch_type
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Last selected channel. Channel 1 until the first switch.
    pub fn channel(&self) -> u8 {
        self.current_channel.unwrap_or(1)
    }

    pub fn available_channels(&self) -> Vec<u8> {
        (1..=self.switch_type.channel_count()).collect()
    }

    /// Select `channel` and return it.
    pub fn switch_to_channel(&mut self, channel: u8) -> Result<u8> {
        self.inner.set("channel", Value::from(channel))?;
        self.current_channel = Some(channel);
        info!(channel, switch_type = %self.switch_type, "Switched to channel");
        Ok(channel)
    }

    pub fn instrument(&self) -> &Instrument {
        &self.inner
    }
}

impl fmt::Debug for AgiltronSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgiltronSwitch")
            .field("switch_type", &self.switch_type)
            .field("identity", &self.identity)
            .field("current_channel", &self.current_channel)
            .finish()
    }
}

impl Driver for AgiltronSwitch {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn attributes(&self) -> Vec<String> {
        self.inner.descriptors().names().map(String::from).collect()
    }

    fn get(&mut self, attribute: &str, channel: Option<&str>) -> Result<Value> {
        if let Some(id) = channel {
            return Err(DriverError::UnknownChannel(id.to_string()));
        }
        match attribute {
            "channel" => Ok(Value::from(self.channel())),
            other => self.inner.get(other),
        }
    }

    fn set(&mut self, attribute: &str, channel: Option<&str>, value: &Value) -> Result<()> {
        if let Some(id) = channel {
            return Err(DriverError::UnknownChannel(id.to_string()));
        }
        match attribute {
            "channel" => {
                let selected = value
                    .as_i64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| ValidationError::WrongType {
                        expected: "channel number".to_string(),
                        received: value.to_string(),
                    })?;
                self.switch_to_channel(selected).map(|_| ())
            }
            other => self.inner.set(other, value.clone()),
        }
    }

    fn discover(&mut self) -> Result<CapabilitySnapshot> {
        discover_descriptors(&mut self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use tracing_test::traced_test;

    #[test]
    fn test_one_by_two_sends_binary_frame() {
        let mock = MockTransport::new();
        let mut switch = AgiltronSwitch::new(mock.clone(), SwitchType::OneByTwo).unwrap();
        assert_eq!(switch.channel(), 1);
        switch.switch_to_channel(2).unwrap();
        assert_eq!(mock.written(), vec![vec![0x01, 0x12, 0x00, 0x02]]);
        assert_eq!(mock.read_count(), 0);
        assert_eq!(switch.channel(), 2);
        assert_eq!(switch.identity().product, "Agiltron 1x2 Switch");
    }

    #[test]
    fn test_one_by_eight_text_protocol() {
        let mock = MockTransport::new()
            .with_framing(crate::adapters::Framing::crlf())
            .with_reply("*PN", "OSW-1x8-SM")
            .with_reply("*SN", "A12345");
        let mut switch = AgiltronSwitch::new(mock.clone(), SwitchType::OneByEight).unwrap();
        assert_eq!(switch.identity().serial, "A12345");
        switch.switch_to_channel(5).unwrap();
        assert_eq!(mock.written().last().unwrap(), b"*SW005\r\n");
        assert_eq!(switch.available_channels(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    #[traced_test]
    fn test_identity_failure_is_not_fatal() {
        let mock = MockTransport::new();
        let switch = AgiltronSwitch::new(mock, SwitchType::OneByEight).unwrap();
        assert_eq!(switch.identity(), &Identity::unknown());
        assert!(logs_contain("Could not retrieve device ID"));
    }

    #[test]
    fn test_invalid_channel_rejected_without_io() {
        let mock = MockTransport::new();
        let mut switch = AgiltronSwitch::new(mock.clone(), SwitchType::OneByTwo).unwrap();
        assert!(matches!(
            switch.switch_to_channel(3),
            Err(DriverError::Validation(_))
        ));
        assert_eq!(mock.write_count(), 0);
        assert_eq!(switch.channel(), 1);
    }

    #[test]
    fn test_identity_descriptor_gated_on_one_by_two() {
        let mock = MockTransport::new();
        let mut switch = AgiltronSwitch::new(mock, SwitchType::OneByTwo).unwrap();
        assert!(matches!(
            Driver::get(&mut switch, "product_name", None),
            Err(DriverError::UnsupportedForVariant { .. })
        ));
    }

    #[test]
    fn test_switch_type_parse() {
        assert_eq!("1x8".parse::<SwitchType>().unwrap(), SwitchType::OneByEight);
        assert!("1x4".parse::<SwitchType>().is_err());
    }
}
