// 热泵命令行工具 (可独立运行)
// Command-line entry point: one-shot register access, manual smoke test and the HTTP API

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hp_backend::api;
use hp_backend::types::tenths_to_degrees;
use hp_backend::{AppConfig, DeviceLink, SharedLink};

/// Read and set the water temperatures of the heat pump over Modbus RTU
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Serial device, overrides the configuration
    #[clap(long)]
    device: Option<String>,

    /// Slave id of the heat pump, overrides the configuration
    #[clap(long)]
    slave: Option<u8>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current water temperature (°C)
    Current,
    /// Print the target water temperature (°C)
    Target,
    /// Set the target water temperature (°C)
    Set {
        #[clap(allow_negative_numbers = true)]
        degrees: i32,
    },
    /// Read, set and read back the target temperature
    Smoke {
        #[clap(long, default_value = "24")]
        target: i32,
    },
    /// Serve the HTTP API
    Serve {
        /// Listen address, overrides the configuration
        #[clap(long)]
        bind: Option<String>,
    },
    /// List the serial ports visible to the system
    Ports,
}

fn smoke_test(link: &DeviceLink, target: i32) -> Result<()> {
    let current = link.read_current_water_temperature()?;
    println!("current water temperature : {}", current);
    let tenths = link.read_target_water_temperature()?;
    println!("current target temperature : {}", tenths_to_degrees(tenths));

    link.set_target_water_temperature(target)
        .context("Error when trying to set the target water temperature")?;

    let tenths = link.read_target_water_temperature()?;
    println!("target temperature is now {} Celsius Degrees", tenths_to_degrees(tenths));
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("Unable to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{} ({:?})", port.port_name, port.port_type);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(device) = args.device {
        config.link.device = device;
    }
    if let Some(slave) = args.slave {
        config.link.slave_id = slave;
    }
    log::debug!("Link configuration: {:?}", config.link);

    let link = DeviceLink::new(config.link.clone());

    match args.command {
        Command::Current => {
            println!("{}", link.read_current_water_temperature()?);
        }
        Command::Target => {
            println!("{}", tenths_to_degrees(link.read_target_water_temperature()?));
        }
        Command::Set { degrees } => {
            println!("{}", link.set_target_water_temperature(degrees)?);
        }
        Command::Smoke { target } => smoke_test(&link, target)?,
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            api::serve(&config.api, Arc::new(SharedLink::new(link)))?;
        }
        Command::Ports => list_ports()?,
    }

    Ok(())
}
