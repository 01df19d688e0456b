//! Configuration system using Figment
//!
//! Configuration is loaded from a TOML file, then overridden by environment
//! variables prefixed with `DAQ_`. Nested keys are separated by a double
//! underscore:
//!
//! ```text
//! DAQ_APPLICATION__LOG_LEVEL=debug
//! DAQ_APPLICATION__NAME="Bench 3"
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "Optics bench"
//! log_level = "info"
//!
//! [[instruments]]
//! id = "switch"
//! driver = "agiltron_switch"
//! transport = { type = "serial", port = "/dev/ttyUSB0" }
//! options = { switch_type = "1x8" }
//!
//! [[instruments]]
//! id = "laser"
//! driver = "toptica_dlc_pro"
//! transport = { type = "tcp", host = "192.168.1.44" }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument::registry::DriverKind;
use crate::instrument::SwitchType;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// How to reach an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial {
        /// Serial port (e.g., "/dev/ttyUSB0", "COM3")
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    Tcp {
        host: String,
        /// Driver default when absent (5025 for SCPI sockets, 1998 for DeCoP)
        #[serde(default)]
        port: Option<u16>,
    },
}

/// Driver-specific options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverOptions {
    /// Agiltron switch personality ("1x2" or "1x8")
    #[serde(default)]
    pub switch_type: Option<SwitchType>,
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Driver name, see [`DriverKind`]
    pub driver: String,
    /// Whether this instrument is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub transport: TransportConfig,
    /// I/O timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Overrides the driver's read termination
    #[serde(default)]
    pub read_termination: Option<String>,
    /// Overrides the driver's write termination
    #[serde(default)]
    pub write_termination: Option<String>,
    #[serde(default)]
    pub options: DriverOptions,
}

impl InstrumentDefinition {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parsed driver name. Fails for names that `validate` would reject.
    pub fn kind(&self) -> Result<DriverKind, ConfigError> {
        self.driver.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "Invalid driver '{}' for instrument '{}'. Must be one of: {}",
                self.driver,
                self.id,
                DriverKind::NAMES.join(", ")
            ))
        })
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "daq-instruments".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    2000
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl DriverConfig {
    /// Load configuration from `path` and `DAQ_` environment variables.
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument IDs are unique and not empty
    /// - Every driver name is known
    /// - Driver-specific requirements (Agiltron switch type, serial vs TCP)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Instrument ID cannot be empty".to_string(),
                ));
            }
            if !ids.insert(&instrument.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            self.validate_instrument(instrument)?;
        }

        Ok(())
    }

    fn validate_instrument(&self, instrument: &InstrumentDefinition) -> Result<(), ConfigError> {
        let kind = instrument.kind()?;
        match (&instrument.transport, kind) {
            (TransportConfig::Serial { port, .. }, _) if port.is_empty() => {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': serial 'port' cannot be empty",
                    instrument.id
                )));
            }
            (TransportConfig::Tcp { host, .. }, _) if host.is_empty() => {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': tcp 'host' cannot be empty",
                    instrument.id
                )));
            }
            (TransportConfig::Tcp { .. }, DriverKind::AgiltronSwitch) => {
                return Err(ConfigError::ValidationError(format!(
                    "Agiltron switch '{}' requires a serial transport",
                    instrument.id
                )));
            }
            (TransportConfig::Serial { .. }, DriverKind::TopticaDlcPro) => {
                return Err(ConfigError::ValidationError(format!(
                    "Toptica DLC Pro '{}' requires a tcp transport",
                    instrument.id
                )));
            }
            _ => {}
        }

        if kind == DriverKind::AgiltronSwitch && instrument.options.switch_type.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Agiltron switch '{}' missing 'options.switch_type' (\"1x2\" or \"1x8\")",
                instrument.id
            )));
        }

        if instrument.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "Instrument '{}': 'timeout_ms' must be > 0",
                instrument.id
            )));
        }

        Ok(())
    }

    /// Get all enabled instruments
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments.iter().filter(|inst| inst.enabled).collect()
    }

    /// Look up an instrument by id, enabled or not.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments.iter().find(|inst| inst.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const BENCH: &str = r#"
        [application]
        name = "Optics bench"
        log_level = "info"

        [[instruments]]
        id = "switch"
        driver = "agiltron_switch"
        transport = { type = "serial", port = "/dev/ttyUSB0" }
        options = { switch_type = "1x8" }

        [[instruments]]
        id = "laser"
        driver = "toptica_dlc_pro"
        enabled = false
        transport = { type = "tcp", host = "192.168.1.44" }
    "#;

    fn definition(id: &str, driver: &str, transport: TransportConfig) -> InstrumentDefinition {
        InstrumentDefinition {
            id: id.to_string(),
            driver: driver.to_string(),
            enabled: true,
            transport,
            timeout_ms: 2000,
            read_termination: None,
            write_termination: None,
            options: DriverOptions::default(),
        }
    }

    fn tcp(host: &str) -> TransportConfig {
        TransportConfig::Tcp {
            host: host.to_string(),
            port: None,
        }
    }

    #[test]
    fn test_load_with_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("bench.toml", BENCH)?;
            let config = DriverConfig::load_from("bench.toml").map_err(|e| e.to_string())?;

            assert_eq!(config.instruments.len(), 2);
            let switch = config.instrument("switch").ok_or("missing switch")?;
            assert_eq!(
                switch.transport,
                TransportConfig::Serial {
                    port: "/dev/ttyUSB0".to_string(),
                    baud_rate: 9600
                }
            );
            assert_eq!(switch.options.switch_type, Some(SwitchType::OneByEight));
            assert_eq!(switch.timeout(), Duration::from_millis(2000));

            let enabled: Vec<&str> = config
                .enabled_instruments()
                .into_iter()
                .map(|i| i.id.as_str())
                .collect();
            assert_eq!(enabled, vec!["switch"]);
            Ok(())
        });
    }

    #[test]
    fn test_application_table_is_optional() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bare.toml",
                r#"
                [[instruments]]
                id = "fg"
                driver = "siglent_sdg1032x"
                transport = { type = "tcp", host = "192.168.1.50" }
                "#,
            )?;
            let config = DriverConfig::load_from("bare.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "info");
            assert_eq!(config.instruments.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("bench.toml", BENCH)?;
            jail.set_env("DAQ_APPLICATION__LOG_LEVEL", "debug");
            let config = DriverConfig::load_from("bench.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bench.toml", BENCH)?;
            jail.set_env("DAQ_APPLICATION__LOG_LEVEL", "loud");
            let err = DriverConfig::load_from("bench.toml").unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)));
            Ok(())
        });
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = DriverConfig {
            application: ApplicationConfig::default(),
            instruments: vec![
                definition("fg", "siglent_sdg1032x", tcp("10.0.0.2")),
                definition("fg", "siglent_sva1000x", tcp("10.0.0.3")),
            ],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate instrument ID"));
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let config = DriverConfig {
            application: ApplicationConfig::default(),
            instruments: vec![definition("x", "keithley_2400", tcp("10.0.0.2"))],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keithley_2400"));
    }

    #[test]
    fn test_agiltron_requirements() {
        let mut switch = definition("sw", "agiltron_switch", tcp("10.0.0.2"));
        let config = DriverConfig {
            application: ApplicationConfig::default(),
            instruments: vec![switch.clone()],
        };
        assert!(config.validate().is_err());

        switch.transport = TransportConfig::Serial {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        };
        let config = DriverConfig {
            application: ApplicationConfig::default(),
            instruments: vec![switch],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("switch_type"));
    }
}
