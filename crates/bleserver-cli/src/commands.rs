//! Command handlers for the bleserver CLI

use bleserver_core::{describe_services, ShutdownReason};
use tracing::info;

use crate::app::BleServerApp;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against the loaded configuration
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Run { .. } => Self::handle_run_command(config).await,
            Commands::Services { json } => Self::handle_services_command(json),
            Commands::Config => Self::handle_config_command(&config),
        }
    }

    async fn handle_run_command(config: AppConfig) -> Result<()> {
        info!(
            "Starting peripheral (advertising timeout {}s)",
            config.peripheral.advertising_timeout_secs
        );
        let app = BleServerApp::new(config);
        let summary = app.run().await?;

        match summary.reason {
            Some(ShutdownReason::AdvertisingTimedOut) => {
                info!("Advertising timed out, {} request(s) dispatched", summary.dispatched)
            }
            _ => info!("Peripheral stopped, {} request(s) dispatched", summary.dispatched),
        }
        Ok(())
    }

    fn handle_services_command(json: bool) -> Result<()> {
        let services = describe_services();
        if json {
            println!("{}", serde_json::to_string_pretty(&services)?);
            return Ok(());
        }

        for service in &services {
            println!("Service {} ({:?})", service.uuid, service.kind);
            for characteristic in &service.characteristics {
                println!(
                    "  Characteristic {} properties={:#04x} permissions={:#06x}",
                    characteristic.uuid,
                    characteristic.properties.bits(),
                    characteristic.permissions.bits()
                );
                for descriptor in &characteristic.descriptors {
                    println!("    Descriptor {} {:?}", descriptor.uuid, descriptor.value);
                }
            }
        }
        Ok(())
    }

    fn handle_config_command(config: &AppConfig) -> Result<()> {
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
