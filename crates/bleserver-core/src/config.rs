//! Peripheral configuration

use std::time::Duration;

use crate::transport::AdvertiseMode;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Length of time advertising may run before it is force-stopped
pub const DEFAULT_ADVERTISING_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Configuration for the peripheral
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeripheralConfig {
    /// Advertising is stopped and the peripheral shut down after this long
    pub advertising_timeout: Duration,
    /// Advertising power mode
    pub advertise_mode: AdvertiseMode,
    /// Local name to advertise; the adapter's own name when unset
    pub device_name: Option<String>,
    /// Whether the device name is part of the advertise payload
    pub include_device_name: bool,
    /// Whether centrals may connect
    pub connectable: bool,
    /// Whether a disconnect discards partially assembled requests
    pub reset_on_disconnect: bool,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            advertising_timeout: DEFAULT_ADVERTISING_TIMEOUT,
            advertise_mode: AdvertiseMode::LowPower,
            device_name: None,
            include_device_name: true,
            connectable: true,
            reset_on_disconnect: true,
        }
    }
}

impl PeripheralConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set advertising timeout
    pub fn with_advertising_timeout(mut self, timeout: Duration) -> Self {
        self.advertising_timeout = timeout;
        self
    }

    /// Set advertising power mode
    pub fn with_advertise_mode(mut self, mode: AdvertiseMode) -> Self {
        self.advertise_mode = mode;
        self
    }

    /// Set advertised device name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Include or omit the device name from the advertise payload
    pub fn with_include_device_name(mut self, include: bool) -> Self {
        self.include_device_name = include;
        self
    }

    /// Enable or disable discarding partial requests on disconnect
    pub fn with_reset_on_disconnect(mut self, enabled: bool) -> Self {
        self.reset_on_disconnect = enabled;
        self
    }
}
