//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Backend, RunOverrides};

#[derive(Parser)]
#[command(name = "bleserver", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Advertise and serve call and message requests until shut down
    Run {
        /// Stop advertising and exit after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Local name to advertise
        #[arg(long)]
        device_name: Option<String>,
        /// Bluetooth stack to run on
        #[arg(long, value_enum)]
        backend: Option<Backend>,
        /// Print produced events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the GATT service catalog
    Services {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Commands {
    /// Flag values that override the configuration layers
    pub fn overrides(&self) -> RunOverrides {
        match self {
            Commands::Run {
                timeout_secs,
                device_name,
                backend,
                json,
            } => RunOverrides {
                timeout_secs: *timeout_secs,
                device_name: device_name.clone(),
                backend: *backend,
                json: *json,
            },
            _ => RunOverrides::default(),
        }
    }
}
