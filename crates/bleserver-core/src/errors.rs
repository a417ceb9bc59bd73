//! Error types for the peripheral core
//!
//! Transport failures are reported by the platform bindings through
//! [`TransportError`]; lifecycle failures of the peripheral itself surface as
//! [`PeripheralError`].

use thiserror::Error;

use crate::types::RequestId;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors reported by a transport adapter implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Bluetooth adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("Advertiser not available: {0}")]
    AdvertiserUnavailable(String),

    #[error("Failed to open GATT server: {0}")]
    ServerOpenFailed(String),

    #[error("Failed to register service {service}: {reason}")]
    ServiceRegistration { service: String, reason: String },

    #[error("Failed to send response for request {request_id}: {reason}")]
    ResponseFailed { request_id: RequestId, reason: String },

    #[error("Advertising error: {0}")]
    Advertising(String),

    #[error("Transport handle already closed")]
    Closed,
}

// ----------------------------------------------------------------------------
// Peripheral Errors
// ----------------------------------------------------------------------------

/// Errors raised by the peripheral lifecycle
#[derive(Debug, Error)]
pub enum PeripheralError {
    #[error("Initialization failed: {0}")]
    Initialization(#[source] TransportError),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Result type for peripheral operations
pub type Result<T> = std::result::Result<T, PeripheralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_error_keeps_source() {
        let err = PeripheralError::Initialization(TransportError::AdapterUnavailable(
            "hci0 missing".into(),
        ));
        assert_eq!(
            err.to_string(),
            "Initialization failed: Bluetooth adapter not available: hci0 missing"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
