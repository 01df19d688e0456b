//! Instruments and the concrete drivers built on the descriptor engine.
//!
//! [`Instrument`] is the generic container: it owns the transport, the instrument
//! level descriptor table, its channels and the name of the detected hardware
//! variant. Concrete drivers wrap an `Instrument` and add typed accessors.
//!
//! Every descriptor access goes through one gate: the descriptor's required variant
//! is compared with the instrument's before any I/O.
//!
//! [`Driver`] is the object-safe surface used by the command line tool to address
//! any configured instrument by attribute name.

pub mod agiltron;
pub mod registry;
pub mod siglent_sdg1032x;
pub mod siglent_sva1000x;
pub mod toptica_dlc_pro;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::adapters::Transport;
use crate::channel::{create_channels, Channel, ChannelId, SharedTransport};
use crate::descriptor::{Descriptor, DescriptorTable};
use crate::discovery::{CapabilityDiscovery, CapabilitySnapshot};
use crate::engine::CommandEngine;
use crate::error::{DriverError, Result};
use crate::session::{DeviceError, Session};
use crate::value::Value;
use crate::variant::ensure_variant;

pub use agiltron::{AgiltronSwitch, SwitchType};
pub use registry::{open_driver, DriverKind};
pub use siglent_sdg1032x::Sdg1032x;
pub use siglent_sva1000x::Sva1000x;
pub use toptica_dlc_pro::{DlcPro, LaserVariant};

/// A physical instrument addressed through command descriptors.
pub struct Instrument {
    name: String,
    transport: SharedTransport,
    descriptors: Arc<DescriptorTable>,
    channels: Vec<Channel>,
    variant: Option<String>,
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("descriptors", &self.descriptors.len())
            .field("channels", &self.channels)
            .field("variant", &self.variant)
            .finish()
    }
}

impl Instrument {
    pub fn new<T: Transport + 'static>(
        name: impl Into<String>,
        transport: T,
        descriptors: DescriptorTable,
    ) -> Self {
        let transport: SharedTransport =
            Arc::new(Mutex::new(Box::new(transport) as Box<dyn Transport>));
        Self {
            name: name.into(),
            transport,
            descriptors: descriptors.into_shared(),
            channels: Vec::new(),
            variant: None,
        }
    }

    /// Fix the hardware variant for the instrument and every channel it has.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        let variant = variant.into();
        for channel in &mut self.channels {
            channel.set_variant(&variant);
        }
        self.variant = Some(variant);
        self
    }

    /// Create the instrument's channels, all sharing `descriptors`.
    pub fn with_channels<I, C>(mut self, ids: I, descriptors: DescriptorTable) -> Result<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<ChannelId>,
    {
        self.channels = create_channels(
            &self.transport,
            ids,
            descriptors.into_shared(),
            self.variant.as_deref(),
        )?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: &str) -> Result<&Channel> {
        self.channels
            .iter()
            .find(|c| c.id().as_str() == id)
            .ok_or_else(|| DriverError::UnknownChannel(id.to_string()))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.transport.lock().set_timeout(timeout);
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let descriptor = self.gate(name)?;
        let mut link = self.transport.lock();
        CommandEngine::get(&mut **link, descriptor, None)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let descriptor = self.gate(name)?;
        let mut link = self.transport.lock();
        CommandEngine::set(&mut **link, descriptor, None, &value)
    }

    pub fn execute(&self, name: &str) -> Result<()> {
        let descriptor = self.gate(name)?;
        let mut link = self.transport.lock();
        CommandEngine::execute(&mut **link, descriptor, None)
    }

    /// Names of instrument-level descriptors that can be queried.
    pub fn readable(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .filter(|d| d.get_template.is_some())
            .filter(|d| ensure_variant(d.required_variant.as_deref(), self.variant()).is_ok())
            .map(|d| d.name.clone())
            .collect()
    }

    fn gate(&self, name: &str) -> Result<&Descriptor> {
        let descriptor = self.descriptors.get(name)?;
        ensure_variant(descriptor.required_variant.as_deref(), self.variant())?;
        Ok(descriptor)
    }
}

/// Lets capability discovery probe descriptor names like SDK parameters.
impl Session for Instrument {
    fn get(&mut self, key: &str) -> std::result::Result<Value, DeviceError> {
        Instrument::get(self, key).map_err(|e| into_device_error(key, e))
    }

    fn set(&mut self, key: &str, value: &Value) -> std::result::Result<(), DeviceError> {
        Instrument::set(self, key, value.clone()).map_err(|e| into_device_error(key, e))
    }

    fn close(&mut self) -> std::result::Result<(), DeviceError> {
        Ok(())
    }
}

fn into_device_error(key: &str, err: DriverError) -> DeviceError {
    match err {
        DriverError::Transport(e) => DeviceError::Transport(e),
        DriverError::Device(e) => e,
        DriverError::UnknownDescriptor(_)
        | DriverError::NoGetSupport(_)
        | DriverError::UnsupportedForVariant { .. } => DeviceError::UnknownParameter {
            name: key.to_string(),
        },
        other => DeviceError::Rejected {
            name: key.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Probe every readable instrument-level descriptor.
pub fn discover_descriptors(instrument: &mut Instrument) -> Result<CapabilitySnapshot> {
    let discovery = CapabilityDiscovery::new(instrument.readable());
    let snapshot = discovery.discover(instrument)?;
    info!(
        instrument = instrument.name(),
        supported = snapshot.count,
        "Descriptor discovery complete"
    );
    Ok(snapshot)
}

/// Object-safe view of any driver, addressed by attribute name.
pub trait Driver: Send {
    fn name(&self) -> &str;

    /// Attribute names, instrument level first, then per channel.
    fn attributes(&self) -> Vec<String>;

    fn get(&mut self, attribute: &str, channel: Option<&str>) -> Result<Value>;

    fn set(&mut self, attribute: &str, channel: Option<&str>, value: &Value) -> Result<()>;

    fn discover(&mut self) -> Result<CapabilitySnapshot>;
}

/// [`Driver::attributes`] for a plain descriptor instrument.
pub(crate) fn descriptor_attributes(instrument: &Instrument) -> Vec<String> {
    let mut names: Vec<String> = instrument.descriptors().names().map(String::from).collect();
    if let Some(first) = instrument.channels().first() {
        names.extend(first.descriptors().names().map(|n| format!("{} (channel)", n)));
    }
    names
}

/// [`Driver::get`] / [`Driver::set`] routing for a plain descriptor instrument.
pub(crate) fn route_get(
    instrument: &Instrument,
    attribute: &str,
    channel: Option<&str>,
) -> Result<Value> {
    match channel {
        Some(id) => instrument.channel(id)?.get(attribute),
        None => instrument.get(attribute),
    }
}

/// A `Value::None` write executes the descriptor as a value-less setting.
pub(crate) fn route_set(
    instrument: &Instrument,
    attribute: &str,
    channel: Option<&str>,
    value: &Value,
) -> Result<()> {
    match (channel, value) {
        (Some(id), Value::None) => instrument.channel(id)?.execute(attribute),
        (Some(id), value) => instrument.channel(id)?.set(attribute, value.clone()),
        (None, Value::None) => instrument.execute(attribute),
        (None, value) => instrument.set(attribute, value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::codec::ValueCodec;

    fn instrument(mock: &MockTransport, variant: &str) -> Instrument {
        let table = DescriptorTable::from_descriptors([
            Descriptor::measurement("product_name", "*PN").for_variant("1x8"),
            Descriptor::setting("reset", "*RST"),
            Descriptor::control("level", "LEV?", "LEV {value}")
                .with_codec(ValueCodec::range(0.0, 10.0)),
        ])
        .unwrap();
        Instrument::new("test", mock.clone(), table).with_variant(variant)
    }

    #[test]
    fn test_variant_gate_before_io() {
        let mock = MockTransport::new().with_default_reply("OSW");
        let inst = instrument(&mock, "1x2");
        assert!(matches!(
            inst.get("product_name"),
            Err(DriverError::UnsupportedForVariant { .. })
        ));
        assert_eq!(mock.write_count(), 0);

        let inst = instrument(&mock, "1x8");
        assert_eq!(inst.get("product_name").unwrap(), Value::from("OSW"));
    }

    #[test]
    fn test_readable_respects_variant() {
        let mock = MockTransport::new();
        assert_eq!(instrument(&mock, "1x2").readable(), vec!["level"]);
        assert_eq!(instrument(&mock, "1x8").readable(), vec!["product_name", "level"]);
    }

    #[test]
    fn test_discover_descriptors() {
        let mock = MockTransport::new().with_reply("LEV?", "2.5");
        let mut inst = instrument(&mock, "1x8");
        mock.inject_fault_at(1);
        let err = discover_descriptors(&mut inst).unwrap_err();
        assert!(matches!(err, DriverError::DiscoveryAborted { .. }));
    }

    #[test]
    fn test_variant_reaches_existing_channels() {
        let mock = MockTransport::new().with_default_reply("1.0");
        let table =
            DescriptorTable::from_descriptors([Descriptor::setting("reset", "*RST")]).unwrap();
        let channel_table = DescriptorTable::from_descriptors([
            Descriptor::measurement("attenuation", ":CH{ch}:ATT?").for_variant("1x8"),
        ])
        .unwrap();
        let inst = Instrument::new("test", mock.clone(), table)
            .with_channels(["1", "2"], channel_table)
            .unwrap()
            .with_variant("1x2");

        for channel in inst.channels() {
            assert!(matches!(
                channel.get("attenuation"),
                Err(DriverError::UnsupportedForVariant { .. })
            ));
        }
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn test_route_set_executes_settings() {
        let mock = MockTransport::new();
        let inst = instrument(&mock, "1x2");
        route_set(&inst, "reset", None, &Value::None).unwrap();
        route_set(&inst, "level", None, &Value::Float(3.0)).unwrap();
        assert_eq!(mock.call_log(), vec!["write: *RST", "write: LEV 3"]);
    }
}
