//! Siglent SDG1032X dual channel function generator.
//!
//! Both outputs share one query, `C<n>:OUTP?`, answered with a comma separated
//! list like `C1:OUTP ON,LOAD,HZ,PLRT,NOR`. Each attribute picks its own token and
//! falls back to the instrument default when the answer is shorter.

use super::{descriptor_attributes, discover_descriptors, route_get, route_set, Driver, Instrument};
use crate::adapters::Transport;
use crate::channel::Channel;
use crate::codec::{ValueCodec, ValueKind};
use crate::descriptor::{Descriptor, DescriptorTable};
use crate::discovery::CapabilitySnapshot;
use crate::error::{DriverError, Result};
use crate::parser::ResponseParser;
use crate::value::{KeyedBlock, Value};

/// Length of the `C1:BSWV ` echo in front of a waveform query answer.
const BSWV_ECHO_LEN: usize = 8;

fn on_off() -> ValueCodec {
    ValueCodec::mapped([(true, "ON"), (false, "OFF")])
}

fn load_codec() -> ValueCodec {
    ValueCodec::predicate("HZ or 50-10000 ohms", ValueKind::Auto, |v| match v {
        Value::Text(t) if t == "HZ" => Ok(()),
        v => match v.as_f64() {
            Some(ohms) if (50.0..=10000.0).contains(&ohms) => Ok(()),
            _ => Err("Load must be 'HZ' or 50-10000 ohms".to_string()),
        },
    })
}

fn channel_descriptors() -> Result<DescriptorTable> {
    DescriptorTable::from_descriptors([
        Descriptor::control("output_enabled", ":C{ch}:OUTP?", ":C{ch}:OUTP {value}")
            .with_codec(on_off())
            .with_parser(ResponseParser::last_word(0, false)),
        Descriptor::control("output_polarity", ":C{ch}:OUTP?", ":C{ch}:OUTP PLRT,{value}")
            .with_codec(ValueCodec::discrete(["NOR", "INVT"]))
            .with_parser(ResponseParser::token(6, "NOR")),
        Descriptor::control("output_load", ":C{ch}:OUTP?", ":C{ch}:OUTP LOAD,{value}")
            .with_codec(load_codec())
            .with_parser(ResponseParser::token(2, "HZ")),
        Descriptor::control(
            "noise_addition_enabled",
            ":C{ch}:NOISE_ADD?",
            ":C{ch}:NOISE_ADD STATE,{value}",
        )
        .with_codec(on_off())
        .with_parser(ResponseParser::token(1, false)),
        Descriptor::measurement("waveform_settings", ":BSWV{ch}?")
            .with_parser(ResponseParser::keyed_block(BSWV_ECHO_LEN)),
    ])
}

fn instrument_descriptors() -> Result<DescriptorTable> {
    DescriptorTable::from_descriptors([
        Descriptor::measurement("id", "*IDN?").with_codec(ValueCodec::any(ValueKind::Text)),
        Descriptor::setting("reset", "*RST"),
        Descriptor::setting("clear", "*CLS"),
    ])
}

/// Siglent SDG1032X function generator with channels `"1"` and `"2"`.
#[derive(Debug)]
pub struct Sdg1032x {
    inner: Instrument,
}

impl Sdg1032x {
    pub fn new<T: Transport + 'static>(transport: T) -> Result<Self> {
        let inner = Instrument::new(
            "Siglent SDG1032X Function Generator",
            transport,
            instrument_descriptors()?,
        )
        .with_channels(["1", "2"], channel_descriptors()?)?;
        Ok(Self { inner })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.inner
    }

    pub fn channel(&self, n: u8) -> Result<&Channel> {
        self.inner.channel(&n.to_string())
    }

    pub fn id(&self) -> Result<String> {
        Ok(self.inner.get("id")?.to_string())
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.execute("reset")
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.execute("clear")
    }

    /// Output state from the last word of the first `OUTP?` token.
    ///
    /// An empty response reads as off. Any token other than `ON`/`OFF`
    /// (or `1`/`0`) is a parse error instead of a silent `false`.
    pub fn output_enabled(&self, ch: u8) -> Result<bool> {
        expect_bool(self.channel(ch)?.get("output_enabled")?)
    }

    pub fn set_output_enabled(&self, ch: u8, enabled: bool) -> Result<()> {
        self.channel(ch)?.set("output_enabled", enabled)
    }

    pub fn output_polarity(&self, ch: u8) -> Result<String> {
        Ok(self.channel(ch)?.get("output_polarity")?.to_string())
    }

    pub fn set_output_polarity(&self, ch: u8, polarity: &str) -> Result<()> {
        self.channel(ch)?.set("output_polarity", polarity)
    }

    /// `Value::Text("HZ")` for high impedance, otherwise the load in ohms.
    pub fn output_load(&self, ch: u8) -> Result<Value> {
        self.channel(ch)?.get("output_load")
    }

    pub fn set_output_load(&self, ch: u8, load: impl Into<Value>) -> Result<()> {
        self.channel(ch)?.set("output_load", load)
    }

    /// Same decoding rules as [`Self::output_enabled`], on token 1.
    pub fn noise_addition_enabled(&self, ch: u8) -> Result<bool> {
        expect_bool(self.channel(ch)?.get("noise_addition_enabled")?)
    }

    pub fn set_noise_addition_enabled(&self, ch: u8, enabled: bool) -> Result<()> {
        self.channel(ch)?.set("noise_addition_enabled", enabled)
    }

    /// Basic waveform parameters (`WVTP`, `FRQ`, `AMP`, ...) in device order.
    pub fn waveform_settings(&self, ch: u8) -> Result<KeyedBlock> {
        match self.channel(ch)?.get("waveform_settings")? {
            Value::Map(block) => Ok(block),
            other => Err(DriverError::parse(other.to_string(), "expected a keyed block")),
        }
    }
}

fn expect_bool(value: Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::parse(value.to_string(), "expected ON or OFF"))
}

impl Driver for Sdg1032x {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn attributes(&self) -> Vec<String> {
        descriptor_attributes(&self.inner)
    }

    fn get(&mut self, attribute: &str, channel: Option<&str>) -> Result<Value> {
        route_get(&self.inner, attribute, channel)
    }

    fn set(&mut self, attribute: &str, channel: Option<&str>, value: &Value) -> Result<()> {
        route_set(&self.inner, attribute, channel, value)
    }

    fn discover(&mut self) -> Result<CapabilitySnapshot> {
        discover_descriptors(&mut self.inner)
    }
}
