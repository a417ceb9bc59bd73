//! GATT server state machine
//!
//! Owns the open server handle and the characteristic value buffers, answers
//! every read and write request exactly once, and feeds characteristic writes
//! into the [`RequestAssembler`]. Write acknowledgements are sent before the
//! payload is routed, so the central never waits on request handling.
//!
//! ```text
//! Uninitialized -> ServerOpen -> ServicesRegistered -> (Connected <-> Disconnected) -> Closed
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assembler::RequestAssembler;
use crate::catalog::{characteristic_refs, describe_services, descriptor_refs, CharacteristicRef};
use crate::config::PeripheralConfig;
use crate::errors::{PeripheralError, Result, TransportError};
use crate::events::{GattServerEvent, PeripheralEvent, PeripheralEventSender, TransportEventSender};
use crate::transport::{BluetoothAdapter, GattResponse, GattServerHandle};
use crate::types::{DeviceAddress, GattStatus, LinkState, RequestId};

// ----------------------------------------------------------------------------
// Server State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    ServerOpen,
    ServicesRegistered,
    Connected,
    Disconnected,
    Closed,
}

impl ServerState {
    pub fn name(self) -> &'static str {
        match self {
            ServerState::Uninitialized => "uninitialized",
            ServerState::ServerOpen => "server open",
            ServerState::ServicesRegistered => "services registered",
            ServerState::Connected => "connected",
            ServerState::Disconnected => "disconnected",
            ServerState::Closed => "closed",
        }
    }
}

type DescriptorKey = (CharacteristicRef, Uuid);

/// Copy of `buffer` from `offset` onward; empty past the end
fn slice_from(buffer: &[u8], offset: usize) -> Vec<u8> {
    buffer.get(offset..).map(<[u8]>::to_vec).unwrap_or_default()
}

/// Apply a (possibly partial) write at `offset`; `None` if the offset is past the end
fn apply_write(buffer: &mut Vec<u8>, offset: usize, value: &[u8]) -> Option<()> {
    if offset == 0 {
        buffer.clear();
        buffer.extend_from_slice(value);
        return Some(());
    }
    if offset > buffer.len() {
        return None;
    }
    buffer.truncate(offset);
    buffer.extend_from_slice(value);
    Some(())
}

// ----------------------------------------------------------------------------
// GATT Server
// ----------------------------------------------------------------------------

pub struct GattServer {
    state: ServerState,
    handle: Option<Box<dyn GattServerHandle>>,
    values: HashMap<CharacteristicRef, Vec<u8>>,
    descriptor_values: HashMap<DescriptorKey, Vec<u8>>,
    assembler: RequestAssembler,
    connected: HashSet<DeviceAddress>,
    mtu: HashMap<DeviceAddress, u16>,
    events: PeripheralEventSender,
    reset_on_disconnect: bool,
    response_failures: u64,
}

impl GattServer {
    pub fn new(config: &PeripheralConfig, events: PeripheralEventSender) -> Self {
        Self {
            state: ServerState::Uninitialized,
            handle: None,
            values: HashMap::new(),
            descriptor_values: HashMap::new(),
            assembler: RequestAssembler::new(),
            connected: HashSet::new(),
            mtu: HashMap::new(),
            events,
            reset_on_disconnect: config.reset_on_disconnect,
            response_failures: 0,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Responses the transport failed to deliver
    pub fn response_failures(&self) -> u64 {
        self.response_failures
    }

    pub fn connected_devices(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.connected.iter()
    }

    pub fn mtu(&self, device: &DeviceAddress) -> Option<u16> {
        self.mtu.get(device).copied()
    }

    pub fn assembler(&self) -> &RequestAssembler {
        &self.assembler
    }

    /// Current value buffer of a characteristic
    pub fn value(&self, characteristic: &CharacteristicRef) -> Option<&[u8]> {
        self.values.get(characteristic).map(Vec::as_slice)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Acquire a server handle from the adapter
    ///
    /// On failure the server moves straight to `Closed`, the UI is notified
    /// and no retry is attempted.
    pub async fn open(
        &mut self,
        adapter: &dyn BluetoothAdapter,
        sink: TransportEventSender,
    ) -> Result<()> {
        if self.state != ServerState::Uninitialized {
            return Err(PeripheralError::InvalidState {
                operation: "open GATT server",
                state: self.state.name(),
            });
        }

        match adapter.open_gatt_server(sink).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = ServerState::ServerOpen;
                info!("GATT server opened");
                Ok(())
            }
            Err(e) => {
                error!("Failed to open GATT server: {}", e);
                self.state = ServerState::Closed;
                let _ = self.events.send(PeripheralEvent::InitializationFailed {
                    reason: e.to_string(),
                });
                Err(PeripheralError::Initialization(e))
            }
        }
    }

    /// Register the service catalog, replacing anything registered before
    pub async fn register_services(&mut self) -> Result<()> {
        let state = self.state;
        let handle = match self.handle.as_mut() {
            Some(handle) if state != ServerState::Closed => handle,
            _ => {
                return Err(PeripheralError::InvalidState {
                    operation: "register services",
                    state: state.name(),
                })
            }
        };

        handle.clear_services().await?;
        for service in describe_services() {
            debug!(
                "Adding service {} with {} characteristics",
                service.uuid,
                service.characteristics.len()
            );
            handle.add_service(&service).await?;
        }

        for characteristic in characteristic_refs() {
            self.values.entry(characteristic).or_default();
        }
        for (characteristic, descriptor) in descriptor_refs() {
            self.descriptor_values
                .entry((characteristic, descriptor.uuid))
                .or_insert_with(|| descriptor.value.into_bytes());
        }

        if state == ServerState::ServerOpen {
            self.state = ServerState::ServicesRegistered;
        }
        info!("GATT services registered");
        Ok(())
    }

    /// Release the server handle; closing twice is a no-op
    pub async fn close(&mut self) {
        if self.state == ServerState::Closed && self.handle.is_none() {
            return;
        }
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
            info!("GATT server closed");
        }
        self.state = ServerState::Closed;
        self.connected.clear();
        self.mtu.clear();
        self.assembler.clear();
    }

    // ------------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------------

    /// Single entry point for transport callbacks
    pub async fn handle_event(&mut self, event: GattServerEvent) {
        match event {
            GattServerEvent::ConnectionStateChanged {
                device,
                status,
                state,
            } => self.handle_connection_state_change(device, status, state),
            GattServerEvent::ServiceAdded { status, service } => {
                debug!("Service {} added with status {:?}", service, status);
            }
            GattServerEvent::CharacteristicReadRequest {
                device,
                request_id,
                offset,
                characteristic,
            } => {
                self.handle_characteristic_read(device, request_id, offset, characteristic)
                    .await;
            }
            GattServerEvent::CharacteristicWriteRequest {
                device,
                request_id,
                characteristic,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                self.handle_characteristic_write(
                    device,
                    request_id,
                    characteristic,
                    prepared_write,
                    response_needed,
                    offset,
                    value,
                )
                .await;
            }
            GattServerEvent::DescriptorReadRequest {
                device,
                request_id,
                offset,
                characteristic,
                descriptor,
            } => {
                self.handle_descriptor_read(device, request_id, offset, characteristic, descriptor)
                    .await;
            }
            GattServerEvent::DescriptorWriteRequest {
                device,
                request_id,
                characteristic,
                descriptor,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                self.handle_descriptor_write(
                    device,
                    request_id,
                    characteristic,
                    descriptor,
                    prepared_write,
                    response_needed,
                    offset,
                    value,
                )
                .await;
            }
            GattServerEvent::ExecuteWrite {
                device,
                request_id,
                execute,
            } => {
                self.handle_execute_write(device, request_id, execute).await;
            }
            GattServerEvent::NotificationSent { device, status } => {
                debug!("Notification sent to {} with status {:?}", device, status);
            }
            GattServerEvent::MtuChanged { device, mtu } => self.handle_mtu_changed(device, mtu),
        }
    }

    pub fn handle_connection_state_change(
        &mut self,
        device: DeviceAddress,
        status: GattStatus,
        state: LinkState,
    ) {
        debug!(
            "Connection state of {} changed to {:?} (status {:?})",
            device, state, status
        );
        if self.state == ServerState::Closed {
            return;
        }

        match state {
            LinkState::Connected => {
                self.connected.insert(device);
            }
            LinkState::Disconnected => {
                self.connected.remove(&device);
                self.mtu.remove(&device);
                if self.reset_on_disconnect {
                    self.assembler.reset(&device);
                }
            }
        }

        self.state = if self.connected.is_empty() {
            ServerState::Disconnected
        } else {
            ServerState::Connected
        };
    }

    pub fn handle_mtu_changed(&mut self, device: DeviceAddress, mtu: u16) {
        debug!("MTU of {} changed to {}", device, mtu);
        self.mtu.insert(device, mtu);
    }

    // ------------------------------------------------------------------------
    // Request Handlers
    // ------------------------------------------------------------------------

    /// Answer a read with the stored value from `offset` onward
    pub async fn handle_characteristic_read(
        &mut self,
        device: DeviceAddress,
        request_id: RequestId,
        offset: usize,
        characteristic: CharacteristicRef,
    ) -> GattResponse {
        debug!(
            "Characteristic read request {} for {} at offset {}",
            request_id, characteristic, offset
        );
        let value = match self.values.get(&characteristic) {
            Some(buffer) => slice_from(buffer, offset),
            None => {
                warn!("Read of unknown characteristic {}", characteristic);
                Vec::new()
            }
        };
        let response = GattResponse::success(device, request_id, offset, value);
        self.respond(response.clone()).await;
        response
    }

    /// Acknowledge a write, then route its payload to the assembler
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_characteristic_write(
        &mut self,
        device: DeviceAddress,
        request_id: RequestId,
        characteristic: CharacteristicRef,
        prepared_write: bool,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    ) -> Option<GattResponse> {
        debug!(
            "Characteristic write request {} for {} at offset {} (prepared: {}): {}",
            request_id,
            characteristic,
            offset,
            prepared_write,
            hex::encode(&value)
        );

        let stored = match self.values.get_mut(&characteristic) {
            Some(buffer) => {
                if apply_write(buffer, offset, &value).is_none() {
                    warn!(
                        "Write to {} at offset {} past end of value",
                        characteristic, offset
                    );
                    let response = GattResponse::error(
                        device,
                        request_id,
                        GattStatus::InvalidOffset,
                        offset,
                    );
                    if response_needed {
                        self.respond(response.clone()).await;
                        return Some(response);
                    }
                    return None;
                }
                Some(buffer.clone())
            }
            None => {
                warn!("Write to unknown characteristic {}", characteristic);
                None
            }
        };

        let response = response_needed.then(|| {
            GattResponse::success(device.clone(), request_id, offset, value.clone())
        });
        if let Some(ref response) = response {
            self.respond(response.clone()).await;
        }

        // The assembler sees the whole stored value, so long writes arriving
        // in offset fragments assemble the spliced text
        if let Some(stored) = stored {
            let completed = self.assembler.on_write(
                &device,
                characteristic.service,
                characteristic.characteristic,
                &stored,
            );
            if let Some(request) = completed {
                info!("Request from {} complete: {:?}", device, request);
                if self.events.send(request.into()).is_err() {
                    warn!("Dispatch channel closed; dropping completed request");
                }
            }
        }

        response
    }

    pub async fn handle_descriptor_read(
        &mut self,
        device: DeviceAddress,
        request_id: RequestId,
        offset: usize,
        characteristic: CharacteristicRef,
        descriptor: Uuid,
    ) -> GattResponse {
        debug!(
            "Descriptor read request {} for {} on {}",
            request_id, descriptor, characteristic
        );
        let value = self
            .descriptor_values
            .get(&(characteristic, descriptor))
            .map(|buffer| slice_from(buffer, offset))
            .unwrap_or_default();
        let response = GattResponse::success(device, request_id, offset, value);
        self.respond(response.clone()).await;
        response
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn handle_descriptor_write(
        &mut self,
        device: DeviceAddress,
        request_id: RequestId,
        characteristic: CharacteristicRef,
        descriptor: Uuid,
        prepared_write: bool,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    ) -> Option<GattResponse> {
        debug!(
            "Descriptor write request {} for {} on {} (prepared: {})",
            request_id, descriptor, characteristic, prepared_write
        );
        let status = match self.descriptor_values.get_mut(&(characteristic, descriptor)) {
            Some(buffer) => match apply_write(buffer, offset, &value) {
                Some(()) => GattStatus::Success,
                None => GattStatus::InvalidOffset,
            },
            None => {
                warn!(
                    "Write to unknown descriptor {} on {}; not stored",
                    descriptor, characteristic
                );
                GattStatus::Success
            }
        };

        if !response_needed {
            return None;
        }
        let response = if status == GattStatus::Success {
            GattResponse::success(device, request_id, offset, value)
        } else {
            GattResponse::error(device, request_id, status, offset)
        };
        self.respond(response.clone()).await;
        Some(response)
    }

    /// Acknowledge an execute-write; prepared writes are not staged
    pub async fn handle_execute_write(
        &mut self,
        device: DeviceAddress,
        request_id: RequestId,
        execute: bool,
    ) -> GattResponse {
        debug!("Execute write request {} (execute: {})", request_id, execute);
        let response = GattResponse::success(device, request_id, 0, Vec::new());
        self.respond(response.clone()).await;
        response
    }

    /// Send a response; failures are logged and counted, never retried
    async fn respond(&mut self, response: GattResponse) {
        let request_id = response.request_id;
        let result = match self.handle.as_mut() {
            Some(handle) => handle.send_response(response).await,
            None => Err(TransportError::Closed),
        };
        if let Err(e) = result {
            self.response_failures += 1;
            warn!("Response to request {} not delivered: {}", request_id, e);
        }
    }
}
