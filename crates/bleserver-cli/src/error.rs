//! Error handling for the bleserver CLI

use bleserver_ble::BluezError;
use bleserver_core::{AdvertiseFailure, PeripheralError};
use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Peripheral error: {0}")]
    Peripheral(#[from] PeripheralError),

    #[error("Bluetooth platform error: {0}")]
    Platform(#[from] BluezError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Advertising failed: {0} (code {code})", code = .0.code())]
    AdvertisingFailed(AdvertiseFailure),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Peripheral task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
