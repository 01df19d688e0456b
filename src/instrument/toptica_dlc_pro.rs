//! Toptica DLC Pro laser controller
//!
//! The controller is driven through its parameter tree ([`Session`]), not through
//! command templates. One controller hosts either a tunable CTL head or a BoosTA pro
//! tapered amplifier; the personality is read from `laser1:type` once at connect
//! time and gates every head-specific parameter afterwards.
//!
//! Writable parameters are checked against limits read from the device itself
//! (`wavelength-min`/`-max`, `current-clip`, ...) before anything is written.
//!
//! ## Example
//!
//! ```no_run
//! use daq_instruments::instrument::DlcPro;
//! use daq_instruments::session::DecopConnector;
//!
//! let mut laser = DlcPro::connect(&DecopConnector::new("192.168.1.44"), None)?;
//! laser.set_wavelength(1550.0)?;
//! laser.set_emission(true)?;
//! let dump = laser.get_all_parameters(true)?;
//! println!("{}", serde_json::to_string_pretty(&dump).unwrap_or_default());
//! laser.shutdown()?;
//! # Ok::<(), daq_instruments::error::DriverError>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::Driver;
use crate::adapters::TcpTransport;
use crate::codec::{ValueCodec, ValueKind};
use crate::discovery::{
    merge_candidates, CapabilityDiscovery, CapabilitySnapshot, DiscoveryMethod, Refusal,
};
use crate::error::{DriverError, Result};
use crate::session::{Connector, DecopConnector, DecopSession, Session};
use crate::value::Value;
use crate::variant::{Variant, VariantGate};

/// SDK key holding the laser head type.
pub const LASER_TYPE_KEY: &str = "laser1:type";

/// Laser head behind the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LaserVariant {
    #[serde(rename = "CTL")]
    Ctl,
    #[serde(rename = "TA")]
    Ta,
    Unknown,
}

impl fmt::Display for LaserVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaserVariant::Ctl => f.write_str("CTL"),
            LaserVariant::Ta => f.write_str("TA"),
            LaserVariant::Unknown => f.write_str("Unknown"),
        }
    }
}

impl Variant for LaserVariant {
    fn classify(raw: &str) -> Self {
        if raw == "CTL" {
            LaserVariant::Ctl
        } else if raw.contains("BoosTApro") {
            LaserVariant::Ta
        } else {
            LaserVariant::Unknown
        }
    }

    fn unknown() -> Self {
        LaserVariant::Unknown
    }
}

/// Allowed domain of a writable parameter.
#[derive(Debug, Clone, Copy)]
enum Limits {
    ReadOnly,
    Boolean,
    /// `[device(min), device(max)]`
    Between(&'static str, &'static str),
    /// `[0, device(max)]`
    UpTo(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct Parameter {
    name: &'static str,
    key: &'static str,
    variant: Option<LaserVariant>,
    limits: Limits,
}

const fn param(
    name: &'static str,
    key: &'static str,
    variant: Option<LaserVariant>,
    limits: Limits,
) -> Parameter {
    Parameter {
        name,
        key,
        variant,
        limits,
    }
}

const CTL: Option<LaserVariant> = Some(LaserVariant::Ctl);
const TA: Option<LaserVariant> = Some(LaserVariant::Ta);

const WAVELENGTH_MIN: &str = "laser1:ctl:wavelength-min";
const WAVELENGTH_MAX: &str = "laser1:ctl:wavelength-max";
const PIEZO_VOLTAGE_MIN: &str = "laser1:dl:pc:voltage-min";
const PIEZO_VOLTAGE_MAX: &str = "laser1:dl:pc:voltage-max";
const CTL_CURRENT_CLIP: &str = "laser1:dl:cc:current-clip";
const TA_CURRENT_CLIP: &str = "ampcc1:channel1:current-clip-limit";
const TA_TEMP_MIN: &str = "laser1:amp:tc:temp-set-min";
const TA_TEMP_MAX: &str = "laser1:amp:tc:temp-set-max";

const PARAMETERS: &[Parameter] = &[
    param("emission", "emission", None, Limits::Boolean),
    param(
        "wavelength",
        "laser1:ctl:wavelength-set",
        CTL,
        Limits::Between(WAVELENGTH_MIN, WAVELENGTH_MAX),
    ),
    param("wavelength_actual", "laser1:ctl:wavelength-act", CTL, Limits::ReadOnly),
    param(
        "scan_offset",
        "laser1:scan:offset",
        CTL,
        Limits::Between(PIEZO_VOLTAGE_MIN, PIEZO_VOLTAGE_MAX),
    ),
    param(
        "ctl_current",
        "laser1:dl:cc:current-set",
        CTL,
        Limits::UpTo(CTL_CURRENT_CLIP),
    ),
    param("ctl_current_actual", "laser1:dl:cc:current-act", CTL, Limits::ReadOnly),
    param(
        "ta_current",
        "ampcc1:channel1:current-set",
        TA,
        Limits::UpTo(TA_CURRENT_CLIP),
    ),
    param("ta_current_actual", "ampcc1:channel1:current-act", TA, Limits::ReadOnly),
    param("ta_current_limit", TA_CURRENT_CLIP, TA, Limits::ReadOnly),
    param("ta_temperature", "laser1:amp:tc:temp-act", TA, Limits::ReadOnly),
    param(
        "ta_temperature_setpoint",
        "laser1:amp:tc:temp-set",
        TA,
        Limits::Between(TA_TEMP_MIN, TA_TEMP_MAX),
    ),
];

fn lookup(name: &str) -> Result<&'static Parameter> {
    PARAMETERS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| DriverError::UnknownDescriptor(name.to_string()))
}

/// Parameters read by a full dump when discovery is not used.
pub fn default_parameters(variant: LaserVariant) -> Vec<&'static str> {
    match variant {
        LaserVariant::Ctl => vec![
            "laser1:ctl:wavelength-set",
            "laser1:ctl:wavelength-act",
            "laser1:scan:offset",
            WAVELENGTH_MAX,
            WAVELENGTH_MIN,
            PIEZO_VOLTAGE_MAX,
            PIEZO_VOLTAGE_MIN,
            "laser1:dl:cc:current-set",
            "laser1:dl:cc:current-act",
            CTL_CURRENT_CLIP,
            LASER_TYPE_KEY,
            "emission",
        ],
        LaserVariant::Ta => vec![
            "ampcc1:channel1:current-set",
            "ampcc1:channel1:current-act",
            "laser1:amp:tc:temp-act",
            "laser1:amp:tc:temp-set",
            TA_TEMP_MIN,
            TA_TEMP_MAX,
            TA_CURRENT_CLIP,
            LASER_TYPE_KEY,
            "emission",
        ],
        LaserVariant::Unknown => vec![LASER_TYPE_KEY, "emission"],
    }
}

/// Further keys worth probing during discovery.
pub fn extended_parameters(variant: LaserVariant) -> Vec<&'static str> {
    let mut keys = vec![
        "system:uptime",
        "system:serial-number",
        "system:model",
        "fw:version",
        "cc1:board-temp",
        "tc1:board-temp",
    ];
    match variant {
        LaserVariant::Ctl => keys.extend([
            "laser1:dl:tc:temp-act",
            "laser1:dl:tc:temp-set",
            "laser1:ctl:mode",
            "laser1:ctl:state",
        ]),
        LaserVariant::Ta => keys.extend(["laser1:amp:photodiode", "laser1:amp:state"]),
        LaserVariant::Unknown => {}
    }
    keys
}

/// Metadata attached to a parameter dump.
#[derive(Debug, Clone, Serialize)]
pub struct DumpMetadata {
    pub laser_type: LaserVariant,
    pub address: String,
    pub timestamp: DateTime<Utc>,
    pub instrument_name: String,
    pub parameter_count: usize,
    pub discovery_method: DiscoveryMethod,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refused: Vec<Refusal>,
}

/// Every readable parameter, keyed by SDK key. Failed reads are kept as
/// `"ERROR: <reason>"` text.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterDump {
    #[serde(flatten)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(rename = "_metadata")]
    pub metadata: DumpMetadata,
}

/// Toptica DLC Pro over any [`Session`].
pub struct DlcPro<S: Session> {
    session: Option<S>,
    gate: VariantGate<LaserVariant>,
    name: String,
    address: String,
}

impl DlcPro<DecopSession<TcpTransport>> {
    /// Connect over the DeCoP command line port.
    pub fn open(host: &str, name: Option<String>) -> Result<Self> {
        Self::connect(&DecopConnector::new(host), name)
    }
}

impl<S: Session> DlcPro<S> {
    /// Open a session and detect the laser head.
    ///
    /// Any failure here is fatal: the session is closed and
    /// [`DriverError::Initialization`] returned.
    pub fn connect<C>(connector: &C, name: Option<String>) -> Result<Self>
    where
        C: Connector<Session = S>,
    {
        let address = connector.address();
        let mut session = connector.connect().map_err(|e| {
            error!(address = %address, error = %e, "Failed to connect to laser");
            DriverError::Initialization(format!("Failed to connect to laser at {}: {}", address, e))
        })?;

        let mut gate = VariantGate::new();
        let detected = gate.detect(|| session.get(LASER_TYPE_KEY).map(|v| v.to_string()));
        let variant = match detected {
            Ok(variant) => variant,
            Err(e) => {
                if let Err(close_err) = session.close() {
                    warn!(error = %close_err, "Failed to close session after detection failure");
                }
                error!(address = %address, error = %e, "Laser type detection failed");
                return Err(DriverError::Initialization(format!(
                    "Failed to read {} at {}: {}",
                    LASER_TYPE_KEY, address, e
                )));
            }
        };

        let name = name.unwrap_or_else(|| format!("Toptica DLC Pro {}", variant));
        info!(name = %name, address = %address, laser_type = %variant, "Connected to laser");
        Ok(Self {
            session: Some(session),
            gate,
            name,
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn laser_type(&self) -> LaserVariant {
        self.gate.current().unwrap_or(LaserVariant::Unknown)
    }

    /// The type string the controller reported, e.g. `"BoosTApro 780"`.
    pub fn raw_laser_type(&self) -> Option<&str> {
        self.gate.raw()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut S> {
        self.session.as_mut().ok_or(DriverError::NotConnected)
    }

    /// Read a raw SDK key.
    pub fn get_parameter(&mut self, key: &str) -> Result<Value> {
        Ok(self.session()?.get(key)?)
    }

    /// Write a raw SDK key, unchecked.
    pub fn set_parameter(&mut self, key: &str, value: &Value) -> Result<()> {
        Ok(self.session()?.set(key, value)?)
    }

    fn number(&mut self, key: &str) -> Result<f64> {
        let value = self.get_parameter(key)?;
        value
            .as_f64()
            .ok_or_else(|| DriverError::parse(value.to_string(), format!("{} is not a number", key)))
    }

    /// Read a named parameter.
    pub fn get(&mut self, name: &str) -> Result<Value> {
        let parameter = lookup(name)?;
        if let Some(required) = parameter.variant {
            self.gate.require(required)?;
        }
        self.get_parameter(parameter.key)
    }

    /// Write a named parameter after checking it against the device limits.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let parameter = lookup(name)?;
        if let Some(required) = parameter.variant {
            self.gate.require(required)?;
        }
        let codec = match parameter.limits {
            Limits::ReadOnly => return Err(DriverError::NoSetSupport(name.to_string())),
            Limits::Boolean => ValueCodec::predicate("true or false", ValueKind::Bool, |v| {
                match v {
                    Value::Bool(_) => Ok(()),
                    _ => Err("Emission must be true or false".to_string()),
                }
            }),
            Limits::Between(min, max) => ValueCodec::range(self.number(min)?, self.number(max)?),
            Limits::UpTo(max) => ValueCodec::range(0.0, self.number(max)?),
        };
        let encoded = codec.encode(&value)?;
        self.set_parameter(parameter.key, &encoded)
    }

    fn limits(&mut self, variant: LaserVariant, min: &str, max: &str) -> Result<(f64, f64)> {
        self.gate.require(variant)?;
        Ok((self.number(min)?, self.number(max)?))
    }

    pub fn emission(&mut self) -> Result<bool> {
        let value = self.get("emission")?;
        value
            .as_bool()
            .ok_or_else(|| DriverError::parse(value.to_string(), "emission is not a boolean"))
    }

    pub fn set_emission(&mut self, on: bool) -> Result<()> {
        self.set("emission", on)
    }

    /// Wavelength setpoint in nm. CTL only.
    pub fn wavelength(&mut self) -> Result<f64> {
        self.get_number("wavelength")
    }

    pub fn set_wavelength(&mut self, nm: f64) -> Result<()> {
        self.set("wavelength", nm)
    }

    pub fn wavelength_actual(&mut self) -> Result<f64> {
        self.get_number("wavelength_actual")
    }

    pub fn wavelength_limits(&mut self) -> Result<(f64, f64)> {
        self.limits(LaserVariant::Ctl, WAVELENGTH_MIN, WAVELENGTH_MAX)
    }

    pub fn scan_offset(&mut self) -> Result<f64> {
        self.get_number("scan_offset")
    }

    pub fn set_scan_offset(&mut self, offset: f64) -> Result<()> {
        self.set("scan_offset", offset)
    }

    pub fn scan_offset_limits(&mut self) -> Result<(f64, f64)> {
        self.limits(LaserVariant::Ctl, PIEZO_VOLTAGE_MIN, PIEZO_VOLTAGE_MAX)
    }

    /// Diode current setpoint in mA. CTL only.
    pub fn ctl_current(&mut self) -> Result<f64> {
        self.get_number("ctl_current")
    }

    pub fn set_ctl_current(&mut self, ma: f64) -> Result<()> {
        self.set("ctl_current", ma)
    }

    pub fn ctl_current_actual(&mut self) -> Result<f64> {
        self.get_number("ctl_current_actual")
    }

    /// Amplifier current setpoint in mA. TA only.
    pub fn ta_current(&mut self) -> Result<f64> {
        self.get_number("ta_current")
    }

    pub fn set_ta_current(&mut self, ma: f64) -> Result<()> {
        self.set("ta_current", ma)
    }

    pub fn ta_current_actual(&mut self) -> Result<f64> {
        self.get_number("ta_current_actual")
    }

    pub fn ta_current_limit(&mut self) -> Result<f64> {
        self.get_number("ta_current_limit")
    }

    pub fn ta_temperature(&mut self) -> Result<f64> {
        self.get_number("ta_temperature")
    }

    pub fn ta_temperature_setpoint(&mut self) -> Result<f64> {
        self.get_number("ta_temperature_setpoint")
    }

    pub fn set_ta_temperature_setpoint(&mut self, celsius: f64) -> Result<()> {
        self.set("ta_temperature_setpoint", celsius)
    }

    pub fn ta_temperature_limits(&mut self) -> Result<(f64, f64)> {
        self.limits(LaserVariant::Ta, TA_TEMP_MIN, TA_TEMP_MAX)
    }

    fn get_number(&mut self, name: &str) -> Result<f64> {
        let value = self.get(name)?;
        value
            .as_f64()
            .ok_or_else(|| DriverError::parse(value.to_string(), format!("{} is not a number", name)))
    }

    /// Candidate keys for discovery on this head.
    pub fn candidate_parameters(&self) -> Vec<String> {
        let variant = self.laser_type();
        merge_candidates(&default_parameters(variant), &extended_parameters(variant))
    }

    /// Probe every candidate key on the device.
    pub fn supported_parameters(&mut self) -> Result<CapabilitySnapshot> {
        let discovery = CapabilityDiscovery::new(self.candidate_parameters());
        discovery.discover(self.session()?)
    }

    /// Read every parameter of interest.
    ///
    /// With `use_dynamic` the key list comes from [`Self::supported_parameters`]; if
    /// the link fails during probing, the predefined list is used instead and the
    /// metadata says so.
    pub fn get_all_parameters(&mut self, use_dynamic: bool) -> Result<ParameterDump> {
        self.session()?;
        let variant = self.laser_type();
        let predefined = || {
            let names = default_parameters(variant);
            (
                names.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                DiscoveryMethod::Predefined,
                Vec::new(),
            )
        };

        let (names, method, refused) = if use_dynamic {
            match self.supported_parameters() {
                Ok(snapshot) => (snapshot.supported(), snapshot.method, snapshot.refused),
                Err(e @ DriverError::DiscoveryAborted { .. }) => {
                    warn!(error = %e, "Dynamic parameter discovery failed, using default list");
                    predefined()
                }
                Err(e) => return Err(e),
            }
        } else {
            predefined()
        };

        let mut parameters = BTreeMap::new();
        for name in &names {
            let value = match self.get_parameter(name) {
                Ok(value) => value,
                Err(e) => Value::Text(format!("ERROR: {}", e)),
            };
            parameters.insert(name.clone(), value);
        }

        info!(
            count = names.len(),
            laser_type = %variant,
            method = %method,
            "Retrieved laser parameters"
        );

        Ok(ParameterDump {
            parameters,
            metadata: DumpMetadata {
                laser_type: variant,
                address: self.address.clone(),
                timestamp: Utc::now(),
                instrument_name: self.name.clone(),
                parameter_count: names.len(),
                discovery_method: method,
                refused,
            },
        })
    }

    /// Close the session. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.close()?;
            info!(address = %self.address, "Connection to laser closed");
        }
        Ok(())
    }
}

impl<S: Session> fmt::Debug for DlcPro<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlcPro")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("laser_type", &self.laser_type())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl<S: Session> Drop for DlcPro<S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Error during laser shutdown");
        }
    }
}

impl<S: Session> Driver for DlcPro<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> Vec<String> {
        let variant = self.laser_type();
        PARAMETERS
            .iter()
            .filter(|p| p.variant.map_or(true, |v| v == variant))
            .map(|p| p.name.to_string())
            .collect()
    }

    /// Named parameters, or raw SDK keys (anything containing `:`).
    fn get(&mut self, attribute: &str, channel: Option<&str>) -> Result<Value> {
        if let Some(id) = channel {
            return Err(DriverError::UnknownChannel(id.to_string()));
        }
        if attribute.contains(':') {
            return self.get_parameter(attribute);
        }
        DlcPro::get(self, attribute)
    }

    fn set(&mut self, attribute: &str, channel: Option<&str>, value: &Value) -> Result<()> {
        if let Some(id) = channel {
            return Err(DriverError::UnknownChannel(id.to_string()));
        }
        if attribute.contains(':') {
            return self.set_parameter(attribute, value);
        }
        DlcPro::set(self, attribute, value.clone())
    }

    fn discover(&mut self) -> Result<CapabilitySnapshot> {
        self.supported_parameters()
    }
}
