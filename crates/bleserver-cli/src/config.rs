//! bleserver configuration management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - `bleserver.toml` in the working directory
//! - The file given with `--config`
//! - Environment variables (`BLESERVER_*`, nested keys separated by `__`,
//!   e.g. `BLESERVER_PERIPHERAL__DEVICE_NAME`)
//! - Command line flags

use std::path::Path;
use std::time::Duration;

use bleserver_core::{AdvertiseMode, PeripheralConfig};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "bleserver.toml";
pub const ENV_PREFIX: &str = "BLESERVER_";

/// Longest local name BlueZ accepts
const MAX_DEVICE_NAME_LEN: usize = 248;

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the bleserver host process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub peripheral: PeripheralSettings,
    pub dispatch: DispatchConfig,
    pub cli: CliConfig,
}

/// Peripheral behaviour, mirrored into [`PeripheralConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralSettings {
    /// Seconds of advertising before the peripheral shuts itself down
    pub advertising_timeout_secs: u64,
    pub advertise_mode: AdvertiseMode,
    /// Local name; the adapter's alias when unset
    pub device_name: Option<String>,
    pub include_device_name: bool,
    pub connectable: bool,
    /// Discard partially written message requests when a central disconnects
    pub reset_on_disconnect: bool,
}

impl Default for PeripheralSettings {
    fn default() -> Self {
        let core = PeripheralConfig::default();
        Self {
            advertising_timeout_secs: core.advertising_timeout.as_secs(),
            advertise_mode: core.advertise_mode,
            device_name: core.device_name,
            include_device_name: core.include_device_name,
            connectable: core.connectable,
            reset_on_disconnect: core.reset_on_disconnect,
        }
    }
}

impl PeripheralSettings {
    pub fn to_peripheral_config(&self) -> PeripheralConfig {
        let mut config = PeripheralConfig::new()
            .with_advertising_timeout(Duration::from_secs(self.advertising_timeout_secs))
            .with_advertise_mode(self.advertise_mode)
            .with_include_device_name(self.include_device_name)
            .with_reset_on_disconnect(self.reset_on_disconnect);
        config.connectable = self.connectable;
        if let Some(ref name) = self.device_name {
            config = config.with_device_name(name.clone());
        }
        config
    }
}

/// Hooks run when a request completes
///
/// Each command is split on whitespace; the request URI (and, for messages,
/// the body) is appended as trailing arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub call_command: Option<String>,
    pub message_command: Option<String>,
}

/// Host process options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Print produced events as JSON lines on stdout
    pub json_events: bool,
    pub backend: Backend,
}

/// Bluetooth stack the peripheral runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Host Bluetooth stack (BlueZ on Linux)
    #[default]
    Bluez,
    /// In-memory stack without a radio
    Memory,
}

/// Flag values that override every other layer
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub timeout_secs: Option<u64>,
    pub device_name: Option<String>,
    pub backend: Option<Backend>,
    pub json: bool,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Layered figment without command line overrides
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, &RunOverrides::default())
    }

    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: &RunOverrides,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileSystem(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        let mut figment = Self::figment(path);
        if let Some(secs) = overrides.timeout_secs {
            figment = figment.merge(("peripheral.advertising_timeout_secs", secs));
        }
        if let Some(ref name) = overrides.device_name {
            figment = figment.merge(("peripheral.device_name", name.clone()));
        }
        if let Some(backend) = overrides.backend {
            figment = figment.merge(("cli.backend", backend));
        }
        if overrides.json {
            figment = figment.merge(("cli.json_events", true));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peripheral.advertising_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Advertising timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(ref name) = self.peripheral.device_name {
            if name.is_empty() || name.len() > MAX_DEVICE_NAME_LEN {
                return Err(ConfigError::Validation(format!(
                    "Device name must be 1 to {} bytes, got {}",
                    MAX_DEVICE_NAME_LEN,
                    name.len()
                )));
            }
        }

        for command in [&self.dispatch.call_command, &self.dispatch.message_command]
            .into_iter()
            .flatten()
        {
            if command.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Dispatch commands must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_match_core() {
        let config = AppConfig::default();
        assert_eq!(config.peripheral.advertising_timeout_secs, 600);
        assert_eq!(config.peripheral.advertise_mode, AdvertiseMode::LowPower);
        assert_eq!(
            config.peripheral.to_peripheral_config(),
            PeripheralConfig::default()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layering_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [peripheral]
                advertising_timeout_secs = 120
                device_name = "from-file"
                "#,
            )?;
            jail.set_env("BLESERVER_PERIPHERAL__DEVICE_NAME", "from-env");

            let config = AppConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.peripheral.advertising_timeout_secs, 120);
            assert_eq!(config.peripheral.device_name.as_deref(), Some("from-env"));

            let overrides = RunOverrides {
                timeout_secs: Some(5),
                device_name: Some("from-flag".into()),
                backend: Some(Backend::Memory),
                json: true,
            };
            let config =
                AppConfig::load_with_overrides(None, &overrides).map_err(|e| e.to_string())?;
            assert_eq!(config.peripheral.advertising_timeout_secs, 5);
            assert_eq!(config.peripheral.device_name.as_deref(), Some("from-flag"));
            assert_eq!(config.cli.backend, Backend::Memory);
            assert!(config.cli.json_events);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/bleserver.toml")));
        assert!(matches!(result, Err(ConfigError::FileSystem(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.peripheral.advertising_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_blank_dispatch_command_rejected() {
        let mut config = AppConfig::default();
        config.dispatch.call_command = Some("   ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.dispatch.message_command = Some("notify-send".into());
        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
