//! Platform adapter selection

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use async_trait::async_trait;
use bleserver_core::{
    AdvertisingBroadcaster, BluetoothAdapter, GattServerHandle, TransportError,
    TransportEventSender,
};

use crate::error::BluezError;

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific adapter enum
pub enum PlatformAdapter {
    #[cfg(target_os = "linux")]
    Bluez(linux::BluezAdapter),
    #[allow(dead_code)]
    Fallback(fallback::FallbackAdapter),
}

impl PlatformAdapter {
    /// Create the appropriate adapter for the current platform
    pub async fn new(device_name: Option<&str>) -> Result<Self, BluezError> {
        #[cfg(target_os = "linux")]
        {
            Ok(Self::Bluez(linux::BluezAdapter::new(device_name).await?))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = device_name;
            Ok(Self::Fallback(fallback::FallbackAdapter::new()))
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Fallback(_))
    }
}

#[async_trait]
impl BluetoothAdapter for PlatformAdapter {
    async fn open_gatt_server(
        &self,
        sink: TransportEventSender,
    ) -> Result<Box<dyn GattServerHandle>, TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Bluez(ref adapter) => adapter.open_gatt_server(sink).await,
            Self::Fallback(ref adapter) => adapter.open_gatt_server(sink).await,
        }
    }

    async fn broadcaster(&self) -> Result<Box<dyn AdvertisingBroadcaster>, TransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Bluez(ref adapter) => adapter.broadcaster().await,
            Self::Fallback(ref adapter) => adapter.broadcaster().await,
        }
    }

    async fn device_name(&self) -> Option<String> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Bluez(ref adapter) => adapter.device_name().await,
            Self::Fallback(ref adapter) => adapter.device_name().await,
        }
    }
}
