//! Command line access to configured instruments.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use daq_instruments::config::DriverConfig;
use daq_instruments::instrument::open_driver;
use daq_instruments::{Driver, Value};

const DEFAULT_CONFIG: &str = "config/instruments.toml";
const EXAMPLE_CONFIG: &str = "config/instruments.example.toml";

#[derive(Parser, Debug)]
#[command(name = "daq-instruments", version, about = "Query and control lab instruments")]
struct Cli {
    /// Configuration file. Start from a copy of config/instruments.example.toml.
    #[arg(long, short, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured instruments.
    List,
    /// Read an attribute.
    Get {
        id: String,
        attribute: String,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Write an attribute. Without a value the attribute is executed as a command.
    Set {
        id: String,
        attribute: String,
        value: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Probe which attributes the instrument answers and print the result as JSON.
    Discover { id: String },
    /// List the attributes a driver exposes.
    Attributes { id: String },
}

fn parse_value(raw: Option<&str>) -> Value {
    match raw {
        None => Value::None,
        Some(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
        Some(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
        Some(s) => Value::infer(s),
    }
}

fn open(config: &DriverConfig, id: &str) -> Result<Box<dyn Driver>> {
    let definition = config
        .instrument(id)
        .ok_or_else(|| anyhow!("Instrument '{}' is not configured", id))?;
    if !definition.enabled {
        return Err(anyhow!("Instrument '{}' is disabled", id));
    }
    open_driver(definition).with_context(|| format!("Failed to open instrument '{}'", id))
}

fn run(cli: Cli, config: DriverConfig) -> Result<()> {
    match cli.command {
        Command::List => {
            for definition in &config.instruments {
                println!(
                    "{:<16} {:<18} {}{}",
                    definition.id,
                    definition.driver,
                    serde_json::to_string(&definition.transport)?,
                    if definition.enabled { "" } else { " (disabled)" }
                );
            }
        }
        Command::Get {
            id,
            attribute,
            channel,
        } => {
            let mut driver = open(&config, &id)?;
            let value = driver
                .get(&attribute, channel.as_deref())
                .with_context(|| format!("Failed to read '{}' on '{}'", attribute, id))?;
            println!("{}", serde_json::to_string(&value)?);
        }
        Command::Set {
            id,
            attribute,
            value,
            channel,
        } => {
            let mut driver = open(&config, &id)?;
            let value = parse_value(value.as_deref());
            driver
                .set(&attribute, channel.as_deref(), &value)
                .with_context(|| format!("Failed to write '{}' on '{}'", attribute, id))?;
        }
        Command::Discover { id } => {
            let mut driver = open(&config, &id)?;
            let snapshot = driver
                .discover()
                .with_context(|| format!("Discovery failed on '{}'", id))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Attributes { id } => {
            let driver = open(&config, &id)?;
            for name in driver.attributes() {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !cli.config.exists() {
        return Err(anyhow!(
            "Configuration file {} not found (copy {} to create it)",
            cli.config.display(),
            EXAMPLE_CONFIG
        ));
    }
    let config = DriverConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(None), Value::None);
        assert_eq!(parse_value(Some("TRUE")), Value::Bool(true));
        assert_eq!(parse_value(Some("2.5e9")), Value::Float(2.5e9));
        assert_eq!(parse_value(Some("42")), Value::Int(42));
        assert_eq!(parse_value(Some("MAXHold")), Value::from("MAXHold"));
    }

    #[test]
    fn test_config_help_names_example_file() {
        let command = Cli::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        let help = config.get_help().unwrap().to_string();
        assert!(help.contains(EXAMPLE_CONFIG));

        let cli = Cli::try_parse_from(["daq-instruments", "list"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn test_parses_set_subcommand() {
        let cli = Cli::try_parse_from([
            "daq-instruments",
            "--config",
            "bench.toml",
            "set",
            "fg",
            "output_load",
            "50",
            "--channel",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Set {
                channel, value, ..
            } => {
                assert_eq!(channel.as_deref(), Some("2"));
                assert_eq!(value.as_deref(), Some("50"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
