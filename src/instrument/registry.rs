//! Builds drivers from configuration entries.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use super::{AgiltronSwitch, DlcPro, Driver, Sdg1032x, Sva1000x};
use crate::adapters::{connect_tcp, Framing, Transport};
use crate::config::{InstrumentDefinition, TransportConfig};
use crate::error::{DriverError, Result};
use crate::session::decop::{DecopConnector, DECOP_PORT};

/// Raw SCPI socket port used by the Siglent instruments.
pub const SCPI_SOCKET_PORT: u16 = 5025;

/// The drivers a configuration entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    AgiltronSwitch,
    SiglentSdg1032x,
    SiglentSva1000x,
    TopticaDlcPro,
}

impl DriverKind {
    /// Configuration names, in declaration order.
    pub const NAMES: [&'static str; 4] = [
        "agiltron_switch",
        "siglent_sdg1032x",
        "siglent_sva1000x",
        "toptica_dlc_pro",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DriverKind::AgiltronSwitch => Self::NAMES[0],
            DriverKind::SiglentSdg1032x => Self::NAMES[1],
            DriverKind::SiglentSva1000x => Self::NAMES[2],
            DriverKind::TopticaDlcPro => Self::NAMES[3],
        }
    }

    /// Line terminations when the configuration does not override them.
    pub fn default_framing(self) -> Framing {
        match self {
            DriverKind::AgiltronSwitch => Framing::crlf(),
            _ => Framing::default(),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "agiltron_switch" => Ok(DriverKind::AgiltronSwitch),
            "siglent_sdg1032x" => Ok(DriverKind::SiglentSdg1032x),
            "siglent_sva1000x" => Ok(DriverKind::SiglentSva1000x),
            "toptica_dlc_pro" => Ok(DriverKind::TopticaDlcPro),
            other => Err(DriverError::Initialization(format!(
                "Unknown driver '{}'",
                other
            ))),
        }
    }
}

fn framing(definition: &InstrumentDefinition, kind: DriverKind) -> Framing {
    let defaults = kind.default_framing();
    Framing::new(
        definition
            .read_termination
            .clone()
            .unwrap_or(defaults.read_termination),
        definition
            .write_termination
            .clone()
            .unwrap_or(defaults.write_termination),
    )
}

fn open_transport(definition: &InstrumentDefinition, kind: DriverKind) -> Result<Box<dyn Transport>> {
    let framing = framing(definition, kind);
    match &definition.transport {
        TransportConfig::Tcp { host, port } => {
            let port = port.unwrap_or(SCPI_SOCKET_PORT);
            let transport = connect_tcp(host, port, framing, definition.timeout())?;
            Ok(Box::new(transport))
        }
        #[cfg(feature = "instrument_serial")]
        TransportConfig::Serial { port, baud_rate } => {
            let transport =
                crate::adapters::open_serial(port, *baud_rate, framing, definition.timeout())?;
            Ok(Box::new(transport))
        }
        #[cfg(not(feature = "instrument_serial"))]
        TransportConfig::Serial { port, .. } => Err(DriverError::Initialization(format!(
            "Serial port '{}' requested but serial support is not compiled in \
             (enable feature 'instrument_serial')",
            port
        ))),
    }
}

/// Connect the driver a configuration entry describes.
pub fn open_driver(definition: &InstrumentDefinition) -> Result<Box<dyn Driver>> {
    let kind: DriverKind = definition.driver.parse()?;
    info!(id = %definition.id, driver = %kind, "Opening instrument");

    let driver: Box<dyn Driver> = match kind {
        DriverKind::AgiltronSwitch => {
            let switch_type = definition.options.switch_type.ok_or_else(|| {
                DriverError::Initialization(format!(
                    "Agiltron switch '{}' has no switch_type",
                    definition.id
                ))
            })?;
            Box::new(AgiltronSwitch::new(
                open_transport(definition, kind)?,
                switch_type,
            )?)
        }
        DriverKind::SiglentSdg1032x => Box::new(Sdg1032x::new(open_transport(definition, kind)?)?),
        DriverKind::SiglentSva1000x => Box::new(Sva1000x::new(open_transport(definition, kind)?)?),
        DriverKind::TopticaDlcPro => match &definition.transport {
            TransportConfig::Tcp { host, port } => {
                let connector = DecopConnector::new(host.as_str())
                    .with_port(port.unwrap_or(DECOP_PORT))
                    .with_timeout(definition.timeout());
                Box::new(DlcPro::connect(&connector, None)?)
            }
            TransportConfig::Serial { .. } => {
                return Err(DriverError::Initialization(format!(
                    "Toptica DLC Pro '{}' requires a tcp transport",
                    definition.id
                )))
            }
        },
    };
    Ok(driver)
}
