//! Fallback adapter for platforms without peripheral-role support

use async_trait::async_trait;
use bleserver_core::{
    AdvertisingBroadcaster, BluetoothAdapter, GattServerHandle, TransportError,
    TransportEventSender,
};
use tracing::warn;

use crate::error::BluezError;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Adapter that reports the peripheral role as unavailable
#[derive(Debug, Default)]
pub struct FallbackAdapter;

impl FallbackAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BluetoothAdapter for FallbackAdapter {
    async fn open_gatt_server(
        &self,
        _sink: TransportEventSender,
    ) -> Result<Box<dyn GattServerHandle>, TransportError> {
        warn!("GATT server not supported on this platform");
        Err(BluezError::Unsupported.into())
    }

    async fn broadcaster(&self) -> Result<Box<dyn AdvertisingBroadcaster>, TransportError> {
        warn!(
            "BLE advertising not supported on this platform. \
            Consider using Linux with BlueZ, or the in-memory backend for a dry run."
        );
        Err(TransportError::AdvertiserUnavailable(
            BluezError::Unsupported.to_string(),
        ))
    }
}
