//! Transport adapter interface consumed by the core
//!
//! Platform bindings implement [`BluetoothAdapter`], [`GattServerHandle`] and
//! [`AdvertisingBroadcaster`]. Calls are fire-and-forget from the core's point
//! of view: an `Err` means the request could not be submitted, while the
//! eventual outcome of an advertising start is reported asynchronously through
//! the [`TransportEventSender`] passed in.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{short_uuid, ServiceDescriptor};
use crate::errors::TransportError;
use crate::events::{AdvertisingEvent, TransportEventSender};
use crate::types::{AdvertiseFailure, DeviceAddress, GattStatus, RequestId};

// ----------------------------------------------------------------------------
// Advertising Parameters
// ----------------------------------------------------------------------------

/// Maximum size of a legacy advertising payload
pub const MAX_ADVERTISING_PAYLOAD: usize = 31;

/// Advertising power mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

impl AdvertiseMode {
    /// Nominal advertising interval for this mode
    pub fn interval(self) -> Duration {
        match self {
            AdvertiseMode::LowPower => Duration::from_millis(1000),
            AdvertiseMode::Balanced => Duration::from_millis(250),
            AdvertiseMode::LowLatency => Duration::from_millis(100),
        }
    }
}

/// Power and lifetime settings for one advertising session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
    /// Transport-level timeout; `None` disables it
    pub timeout: Option<Duration>,
}

/// Content of the advertise payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseData {
    pub service_uuids: Vec<Uuid>,
    pub include_device_name: bool,
    /// Name to advertise instead of the adapter's own
    pub local_name: Option<String>,
}

impl AdvertiseData {
    /// Name carried in the payload, falling back to `adapter_name`
    pub fn advertised_name<'a>(&'a self, adapter_name: &'a str) -> &'a str {
        self.local_name.as_deref().unwrap_or(adapter_name)
    }

    /// Encoded size of the payload as a legacy advertising PDU
    ///
    /// Counts the flags field, one complete UUID list per UUID width, and the
    /// complete local name when included.
    pub fn encoded_len(&self, adapter_name: &str) -> usize {
        const FLAGS_LEN: usize = 3;
        const AD_HEADER_LEN: usize = 2;

        let (short, long): (Vec<&Uuid>, Vec<&Uuid>) = self
            .service_uuids
            .iter()
            .partition(|uuid| short_uuid(uuid).is_some());

        let mut len = FLAGS_LEN;
        if !short.is_empty() {
            len += AD_HEADER_LEN + short.len() * 2;
        }
        if !long.is_empty() {
            len += AD_HEADER_LEN + long.len() * 16;
        }
        if self.include_device_name {
            len += AD_HEADER_LEN + self.advertised_name(adapter_name).len();
        }
        len
    }

    pub fn fits(&self, adapter_name: &str) -> bool {
        self.encoded_len(adapter_name) <= MAX_ADVERTISING_PAYLOAD
    }
}

/// Reports the outcome of one advertising start request
///
/// Every event is tagged with the session that issued the request, so a late
/// outcome for a session that was already stopped can be told apart.
#[derive(Debug, Clone)]
pub struct AdvertisingCallback {
    session: u64,
    sink: TransportEventSender,
}

impl AdvertisingCallback {
    pub fn new(session: u64, sink: TransportEventSender) -> Self {
        Self { session, sink }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn started(&self, settings_in_effect: AdvertiseSettings) {
        let _ = self.sink.send(
            AdvertisingEvent::StartSuccess {
                session: self.session,
                settings_in_effect,
            }
            .into(),
        );
    }

    pub fn failed(&self, error: AdvertiseFailure) {
        let _ = self.sink.send(
            AdvertisingEvent::StartFailure {
                session: self.session,
                error,
            }
            .into(),
        );
    }
}

// ----------------------------------------------------------------------------
// GATT Responses
// ----------------------------------------------------------------------------

/// Response to a single pending ATT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    pub device: DeviceAddress,
    pub request_id: RequestId,
    pub status: GattStatus,
    pub offset: usize,
    pub value: Vec<u8>,
}

impl GattResponse {
    pub fn success(
        device: DeviceAddress,
        request_id: RequestId,
        offset: usize,
        value: Vec<u8>,
    ) -> Self {
        Self {
            device,
            request_id,
            status: GattStatus::Success,
            offset,
            value,
        }
    }

    pub fn error(
        device: DeviceAddress,
        request_id: RequestId,
        status: GattStatus,
        offset: usize,
    ) -> Self {
        Self {
            device,
            request_id,
            status,
            offset,
            value: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// Entry point into the platform Bluetooth stack
#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    /// Open a GATT server whose callbacks are delivered to `sink`
    async fn open_gatt_server(
        &self,
        sink: TransportEventSender,
    ) -> Result<Box<dyn GattServerHandle>, TransportError>;

    /// Obtain the advertising broadcaster
    async fn broadcaster(&self) -> Result<Box<dyn AdvertisingBroadcaster>, TransportError>;

    /// Name the adapter advertises when no explicit name is configured
    async fn device_name(&self) -> Option<String> {
        None
    }
}

/// An open GATT server
#[async_trait]
pub trait GattServerHandle: Send {
    /// Remove every registered service
    async fn clear_services(&mut self) -> Result<(), TransportError>;

    /// Register one service
    async fn add_service(&mut self, service: &ServiceDescriptor) -> Result<(), TransportError>;

    /// Answer a pending request
    async fn send_response(&mut self, response: GattResponse) -> Result<(), TransportError>;

    /// Release the server
    async fn close(&mut self);
}

/// Advertising broadcaster
#[async_trait]
pub trait AdvertisingBroadcaster: Send {
    /// Begin advertising; the outcome is reported through `callback`
    async fn start_advertising(
        &mut self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        callback: AdvertisingCallback,
    ) -> Result<(), TransportError>;

    /// Stop the current advertising session
    async fn stop_advertising(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ADVERTISED_SERVICE_UUID;

    #[test]
    fn test_encoded_len_short_uuid_and_name() {
        let data = AdvertiseData {
            service_uuids: vec![ADVERTISED_SERVICE_UUID],
            include_device_name: true,
            local_name: None,
        };
        // flags(3) + uuid16 list(2 + 2) + name(2 + 6)
        assert_eq!(data.encoded_len("Pixel7"), 15);
        assert!(data.fits("Pixel7"));
    }

    #[test]
    fn test_long_name_exceeds_budget() {
        let data = AdvertiseData {
            service_uuids: vec![ADVERTISED_SERVICE_UUID],
            include_device_name: true,
            local_name: None,
        };
        let name = "a-rather-long-bluetooth-device-name";
        assert!(!data.fits(name));

        let without_name = AdvertiseData {
            include_device_name: false,
            ..data.clone()
        };
        assert!(without_name.fits(name));

        let renamed = AdvertiseData {
            local_name: Some("relay".into()),
            ..data
        };
        assert!(renamed.fits(name));
        assert_eq!(renamed.advertised_name(name), "relay");
    }

    #[test]
    fn test_power_modes_map_to_intervals() {
        assert_eq!(AdvertiseMode::LowPower.interval(), Duration::from_millis(1000));
        assert!(AdvertiseMode::Balanced.interval() < AdvertiseMode::LowPower.interval());
        assert!(AdvertiseMode::LowLatency.interval() < AdvertiseMode::Balanced.interval());
    }

    #[test]
    fn test_configured_name_counts_against_budget() {
        let data = AdvertiseData {
            service_uuids: vec![ADVERTISED_SERVICE_UUID],
            include_device_name: true,
            local_name: Some("a-rather-long-bluetooth-device-name".into()),
        };
        assert!(!data.fits("short"));
        assert_eq!(data.encoded_len("short"), 3 + 4 + 2 + 35);
    }

    #[tokio::test]
    async fn test_callback_tags_events_with_session() {
        let (sink, mut events) = tokio::sync::mpsc::unbounded_channel();
        let callback = AdvertisingCallback::new(7, sink);
        callback.failed(AdvertiseFailure::AlreadyStarted);
        assert_eq!(
            events.recv().await,
            Some(
                AdvertisingEvent::StartFailure {
                    session: 7,
                    error: AdvertiseFailure::AlreadyStarted,
                }
                .into()
            )
        );
    }

    #[test]
    fn test_custom_uuid_costs_sixteen_bytes() {
        let data = AdvertiseData {
            service_uuids: vec![Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E)],
            include_device_name: false,
            local_name: None,
        };
        assert_eq!(data.encoded_len(""), 3 + 2 + 16);
    }
}
