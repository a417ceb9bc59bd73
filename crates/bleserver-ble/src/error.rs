//! Error types for the platform bindings

use bleserver_core::TransportError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while talking to the platform Bluetooth stack
#[derive(Error, Debug)]
pub enum BluezError {
    #[error("Failed to open Bluetooth session: {0}")]
    Session(String),

    #[error("No Bluetooth adapter: {0}")]
    NoAdapter(String),

    #[error("Failed to power on adapter: {0}")]
    PowerOn(String),

    #[error("Failed to serve GATT application: {0}")]
    ServeApplication(String),

    #[error("LE advertising unavailable: {0}")]
    Advertise(String),

    #[error("Peripheral role not supported on this platform")]
    Unsupported,
}

impl From<BluezError> for TransportError {
    fn from(err: BluezError) -> Self {
        match err {
            BluezError::Session(_) | BluezError::NoAdapter(_) | BluezError::PowerOn(_) => {
                TransportError::AdapterUnavailable(err.to_string())
            }
            BluezError::ServeApplication(reason) => TransportError::ServerOpenFailed(reason),
            BluezError::Advertise(reason) => TransportError::AdvertiserUnavailable(reason),
            BluezError::Unsupported => TransportError::AdapterUnavailable(err.to_string()),
        }
    }
}
