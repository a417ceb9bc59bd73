//! In-memory transport adapter
//!
//! Behaves like a cooperative platform stack without a radio: it records every
//! call the core makes, answers advertising starts through the callback sink,
//! and lets the caller play the part of a connected central by injecting GATT
//! callbacks. Failures can be scripted per operation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::{CharacteristicRef, ServiceDescriptor};
use crate::errors::TransportError;
use crate::events::{GattServerEvent, TransportEventSender};
use crate::transport::{
    AdvertiseData, AdvertiseSettings, AdvertisingBroadcaster, AdvertisingCallback,
    BluetoothAdapter, GattResponse, GattServerHandle,
};
use crate::types::{AdvertiseFailure, DeviceAddress, GattStatus, LinkState, RequestId};

pub const DEFAULT_MEMORY_DEVICE_NAME: &str = "bleserver";

// ----------------------------------------------------------------------------
// Recorded State
// ----------------------------------------------------------------------------

/// Everything the adapter has observed so far
#[derive(Debug, Default)]
pub struct MemoryState {
    pub services: Vec<ServiceDescriptor>,
    pub responses: Vec<GattResponse>,
    pub server_open: bool,
    pub server_closes: usize,
    pub advertising: bool,
    pub advertising_starts: usize,
    pub advertising_stops: usize,
    pub last_settings: Option<AdvertiseSettings>,
    pub last_data: Option<AdvertiseData>,
    sink: Option<TransportEventSender>,
    fail_open: Option<TransportError>,
    fail_broadcaster: Option<TransportError>,
    fail_registration: Option<TransportError>,
    fail_advertising: Option<AdvertiseFailure>,
    fail_responses: bool,
    hold_advertising_result: bool,
}

// ----------------------------------------------------------------------------
// Memory Adapter
// ----------------------------------------------------------------------------

/// Shared handle to an in-memory Bluetooth stack
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    device_name: String,
    state: Arc<Mutex<MemoryState>>,
    next_request_id: Arc<AtomicU32>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_DEVICE_NAME)
    }
}

impl MemoryAdapter {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            next_request_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Make `open_gatt_server` fail
    pub fn with_open_failure(self, error: TransportError) -> Self {
        self.lock().fail_open = Some(error);
        self
    }

    /// Make `broadcaster` fail
    pub fn with_broadcaster_failure(self, error: TransportError) -> Self {
        self.lock().fail_broadcaster = Some(error);
        self
    }

    /// Make `add_service` fail
    pub fn with_registration_failure(self, error: TransportError) -> Self {
        self.lock().fail_registration = Some(error);
        self
    }

    /// Report `failure` for every advertising start
    pub fn with_advertising_failure(self, failure: AdvertiseFailure) -> Self {
        self.lock().fail_advertising = Some(failure);
        self
    }

    /// Reject every `send_response`
    pub fn with_response_failures(self) -> Self {
        self.lock().fail_responses = true;
        self
    }

    /// Never confirm advertising starts, leaving the controller in `Starting`
    pub fn with_pending_advertising(self) -> Self {
        self.lock().hold_advertising_result = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.device_name
    }

    /// Lock the recorded state
    pub fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.lock().services.clone()
    }

    pub fn responses(&self) -> Vec<GattResponse> {
        self.lock().responses.clone()
    }

    pub fn is_advertising(&self) -> bool {
        self.lock().advertising
    }

    pub fn is_server_open(&self) -> bool {
        self.lock().server_open
    }

    // ------------------------------------------------------------------------
    // Central Simulation
    // ------------------------------------------------------------------------

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Deliver a raw GATT callback; `false` if no server is open
    pub fn inject(&self, event: GattServerEvent) -> bool {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => sink.send(event.into()).is_ok(),
            None => false,
        }
    }

    pub fn connect(&self, device: &DeviceAddress) -> bool {
        self.inject(GattServerEvent::ConnectionStateChanged {
            device: device.clone(),
            status: GattStatus::Success,
            state: LinkState::Connected,
        })
    }

    pub fn disconnect(&self, device: &DeviceAddress) -> bool {
        self.inject(GattServerEvent::ConnectionStateChanged {
            device: device.clone(),
            status: GattStatus::Success,
            state: LinkState::Disconnected,
        })
    }

    /// Issue a write request from `device`; returns the request id used
    pub fn write(
        &self,
        device: &DeviceAddress,
        characteristic: CharacteristicRef,
        value: impl Into<Vec<u8>>,
    ) -> RequestId {
        let request_id = self.next_request_id();
        self.inject(GattServerEvent::CharacteristicWriteRequest {
            device: device.clone(),
            request_id,
            characteristic,
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: value.into(),
        });
        request_id
    }

    /// Issue a read request from `device`; returns the request id used
    pub fn read(
        &self,
        device: &DeviceAddress,
        characteristic: CharacteristicRef,
        offset: usize,
    ) -> RequestId {
        let request_id = self.next_request_id();
        self.inject(GattServerEvent::CharacteristicReadRequest {
            device: device.clone(),
            request_id,
            offset,
            characteristic,
        });
        request_id
    }
}

#[async_trait]
impl BluetoothAdapter for MemoryAdapter {
    async fn open_gatt_server(
        &self,
        sink: TransportEventSender,
    ) -> Result<Box<dyn GattServerHandle>, TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.fail_open.clone() {
            return Err(error);
        }
        state.server_open = true;
        state.sink = Some(sink);
        debug!("Memory GATT server opened");
        Ok(Box::new(MemoryGattServer {
            state: self.state.clone(),
            closed: false,
        }))
    }

    async fn broadcaster(&self) -> Result<Box<dyn AdvertisingBroadcaster>, TransportError> {
        if let Some(error) = self.lock().fail_broadcaster.clone() {
            return Err(error);
        }
        Ok(Box::new(MemoryBroadcaster {
            device_name: self.device_name.clone(),
            state: self.state.clone(),
        }))
    }

    async fn device_name(&self) -> Option<String> {
        Some(self.device_name.clone())
    }
}

// ----------------------------------------------------------------------------
// GATT Server and Broadcaster
// ----------------------------------------------------------------------------

struct MemoryGattServer {
    state: Arc<Mutex<MemoryState>>,
    closed: bool,
}

impl MemoryGattServer {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

#[async_trait]
impl GattServerHandle for MemoryGattServer {
    async fn clear_services(&mut self) -> Result<(), TransportError> {
        self.lock()?.services.clear();
        Ok(())
    }

    async fn add_service(&mut self, service: &ServiceDescriptor) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if let Some(error) = state.fail_registration.clone() {
            return Err(error);
        }
        state.services.push(service.clone());
        if let Some(sink) = state.sink.as_ref() {
            let _ = sink.send(
                GattServerEvent::ServiceAdded {
                    status: GattStatus::Success,
                    service: service.uuid,
                }
                .into(),
            );
        }
        Ok(())
    }

    async fn send_response(&mut self, response: GattResponse) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if state.fail_responses {
            return Err(TransportError::ResponseFailed {
                request_id: response.request_id,
                reason: "scripted failure".into(),
            });
        }
        state.responses.push(response);
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(mut state) = self.lock() {
            state.server_open = false;
            state.server_closes += 1;
            state.services.clear();
            state.sink = None;
        }
        self.closed = true;
    }
}

struct MemoryBroadcaster {
    device_name: String,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl AdvertisingBroadcaster for MemoryBroadcaster {
    async fn start_advertising(
        &mut self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        callback: AdvertisingCallback,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.advertising_starts += 1;
        state.last_settings = Some(settings.clone());
        state.last_data = Some(data.clone());

        let outcome = if state.advertising {
            Err(AdvertiseFailure::AlreadyStarted)
        } else if let Some(failure) = state.fail_advertising {
            Err(failure)
        } else if !data.fits(&self.device_name) {
            Err(AdvertiseFailure::DataTooLarge)
        } else {
            Ok(())
        };

        if state.hold_advertising_result {
            return Ok(());
        }
        match outcome {
            Ok(()) => {
                state.advertising = true;
                callback.started(settings.clone());
            }
            Err(error) => callback.failed(error),
        }
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.advertising = false;
        state.advertising_stops += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::describe_services;
    use crate::events::AdvertisingEvent;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_oversized_payload_reports_data_too_large() {
        let adapter = MemoryAdapter::new("a-rather-long-bluetooth-device-name");
        let mut broadcaster = adapter.broadcaster().await.unwrap();
        let (sink, mut events) = mpsc::unbounded_channel();

        let settings = AdvertiseSettings {
            mode: crate::transport::AdvertiseMode::LowPower,
            connectable: true,
            timeout: None,
        };
        let data = AdvertiseData {
            service_uuids: vec![crate::catalog::ADVERTISED_SERVICE_UUID],
            include_device_name: true,
            local_name: None,
        };
        broadcaster
            .start_advertising(&settings, &data, AdvertisingCallback::new(1, sink))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            AdvertisingEvent::StartFailure {
                session: 1,
                error: AdvertiseFailure::DataTooLarge
            }
            .into()
        );
        assert!(!adapter.is_advertising());
    }

    #[tokio::test]
    async fn test_closed_server_rejects_calls() {
        let adapter = MemoryAdapter::default();
        let (sink, _events) = mpsc::unbounded_channel();
        let mut server = adapter.open_gatt_server(sink).await.unwrap();
        server.add_service(&describe_services()[0]).await.unwrap();
        server.close().await;
        server.close().await;

        assert_eq!(adapter.lock().server_closes, 1);
        assert!(!adapter.is_server_open());
        assert_eq!(
            server.clear_services().await,
            Err(TransportError::Closed)
        );
    }
}
