//! Linux peripheral implementation using bluer (BlueZ)
//!
//! BlueZ answers ATT requests from async callbacks. Each callback allocates a
//! request id, parks a oneshot responder, and forwards the request to the core
//! as a [`GattServerEvent`]; the core's `send_response` resolves the parked
//! responder, which completes the callback.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bleserver_core::catalog::{
    CharacteristicDescriptor, CharacteristicProperties, CharacteristicRef, ServiceDescriptor,
    ServiceKind,
};
use bleserver_core::{
    AdvertiseData, AdvertiseFailure, AdvertiseSettings, AdvertisingBroadcaster,
    AdvertisingCallback, BluetoothAdapter, DeviceAddress, GattResponse, GattServerEvent, GattServerHandle, GattStatus,
    LinkState, RequestId, TransportError, TransportEventSender,
};
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, Descriptor,
    DescriptorRead, DescriptorReadRequest, ReqError, Service,
};
use bluer::gatt::WriteOp;
use bluer::{Address, DeviceEvent, DeviceProperty};
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BluezError;

/// How long a BlueZ callback waits for the core to answer
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status_to_result(status: GattStatus) -> Result<(), ReqError> {
    match status {
        GattStatus::Success => Ok(()),
        GattStatus::InvalidOffset => Err(ReqError::InvalidOffset),
        GattStatus::RequestNotSupported => Err(ReqError::NotSupported),
        GattStatus::Failure => Err(ReqError::Failed),
    }
}

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

pub struct BluezAdapter {
    _session: bluer::Session,
    adapter: bluer::Adapter,
}

impl BluezAdapter {
    /// Connect to BlueZ, power on the default adapter and apply `device_name`
    pub async fn new(device_name: Option<&str>) -> Result<Self, BluezError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| BluezError::Session(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| BluezError::NoAdapter(e.to_string()))?;

        if !adapter.is_powered().await.unwrap_or(false) {
            adapter
                .set_powered(true)
                .await
                .map_err(|e| BluezError::PowerOn(e.to_string()))?;
        }
        if let Some(name) = device_name {
            if let Err(e) = adapter.set_alias(name.to_string()).await {
                warn!("Failed to set adapter alias to {}: {}", name, e);
            }
        }

        info!("BlueZ adapter {} initialized", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

#[async_trait]
impl BluetoothAdapter for BluezAdapter {
    async fn open_gatt_server(
        &self,
        sink: TransportEventSender,
    ) -> Result<Box<dyn GattServerHandle>, TransportError> {
        let powered = self
            .adapter
            .is_powered()
            .await
            .map_err(|e| TransportError::ServerOpenFailed(e.to_string()))?;
        if !powered {
            return Err(TransportError::ServerOpenFailed(format!(
                "adapter {} is powered off",
                self.adapter.name()
            )));
        }

        let shared = Arc::new(Shared {
            adapter: self.adapter.clone(),
            sink,
            next_request_id: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
        });
        Ok(Box::new(BluezGattServer {
            shared,
            services: Vec::new(),
            application: None,
        }))
    }

    async fn broadcaster(&self) -> Result<Box<dyn AdvertisingBroadcaster>, TransportError> {
        let instances = self
            .adapter
            .supported_advertising_instances()
            .await
            .map_err(|e| BluezError::Advertise(e.to_string()))?;
        if instances == 0 {
            return Err(BluezError::Advertise("no advertising instances available".into()).into());
        }
        debug!("{} LE advertising instance(s) supported", instances);
        Ok(Box::new(BluezBroadcaster {
            adapter: self.adapter.clone(),
            advertisement: None,
        }))
    }

    async fn device_name(&self) -> Option<String> {
        self.adapter.alias().await.ok()
    }
}

// ----------------------------------------------------------------------------
// Callback Plumbing
// ----------------------------------------------------------------------------

/// State shared between the server handle and BlueZ callbacks
struct Shared {
    adapter: bluer::Adapter,
    sink: TransportEventSender,
    next_request_id: AtomicU32,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<GattResponse>>>,
    /// Connected centrals and their last reported MTU
    devices: Mutex<HashMap<Address, u16>>,
}

impl Shared {
    fn allocate(&self) -> RequestId {
        RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: GattServerEvent) -> bool {
        self.sink.send(event.into()).is_ok()
    }

    /// Track the central behind a request; reports new connections and MTU changes
    fn observe(self: &Arc<Self>, address: Address, mtu: u16) -> DeviceAddress {
        let device = DeviceAddress::new(address.to_string());
        let previous = lock(&self.devices).insert(address, mtu);
        match previous {
            None => {
                self.emit(GattServerEvent::ConnectionStateChanged {
                    device: device.clone(),
                    status: GattStatus::Success,
                    state: LinkState::Connected,
                });
                self.emit(GattServerEvent::MtuChanged {
                    device: device.clone(),
                    mtu,
                });
                self.watch_device(address);
            }
            Some(old) if old != mtu => {
                self.emit(GattServerEvent::MtuChanged {
                    device: device.clone(),
                    mtu,
                });
            }
            Some(_) => {}
        }
        device
    }

    /// Report a disconnect once the device's Connected property drops
    fn watch_device(self: &Arc<Self>, address: Address) {
        let shared = self.clone();
        tokio::spawn(async move {
            let events = match shared.adapter.device(address) {
                Ok(device) => device.events().await,
                Err(e) => Err(e),
            };
            let mut events = match events {
                Ok(events) => Box::pin(events),
                Err(e) => {
                    warn!("Cannot watch connection state of {}: {}", address, e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    break;
                }
            }

            lock(&shared.devices).remove(&address);
            shared.emit(GattServerEvent::ConnectionStateChanged {
                device: DeviceAddress::new(address.to_string()),
                status: GattStatus::Success,
                state: LinkState::Disconnected,
            });
        });
    }

    /// Forward a request to the core and wait for its answer
    async fn request(&self, request_id: RequestId, event: GattServerEvent) -> Option<GattResponse> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        if !self.emit(event) {
            lock(&self.pending).remove(&request_id);
            return None;
        }

        match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("Request {} was not answered in time", request_id);
                lock(&self.pending).remove(&request_id);
                None
            }
        }
    }

    async fn on_read(
        self: Arc<Self>,
        characteristic: CharacteristicRef,
        req: CharacteristicReadRequest,
    ) -> Result<Vec<u8>, ReqError> {
        let device = self.observe(req.device_address, req.mtu);
        let request_id = self.allocate();
        let event = GattServerEvent::CharacteristicReadRequest {
            device,
            request_id,
            offset: usize::from(req.offset),
            characteristic,
        };
        let response = self.request(request_id, event).await.ok_or(ReqError::Failed)?;
        status_to_result(response.status)?;
        Ok(response.value)
    }

    async fn on_descriptor_read(
        self: Arc<Self>,
        characteristic: CharacteristicRef,
        descriptor: Uuid,
        req: DescriptorReadRequest,
    ) -> Result<Vec<u8>, ReqError> {
        let request_id = self.allocate();
        let event = GattServerEvent::DescriptorReadRequest {
            device: DeviceAddress::new(req.device_address.to_string()),
            request_id,
            offset: usize::from(req.offset),
            characteristic,
            descriptor,
        };
        let response = self.request(request_id, event).await.ok_or(ReqError::Failed)?;
        status_to_result(response.status)?;
        Ok(response.value)
    }

    async fn on_write(
        self: Arc<Self>,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        req: CharacteristicWriteRequest,
    ) -> Result<(), ReqError> {
        let device = self.observe(req.device_address, req.mtu);
        let request_id = self.allocate();
        let response_needed = !matches!(req.op_type, WriteOp::Command);
        let event = GattServerEvent::CharacteristicWriteRequest {
            device,
            request_id,
            characteristic,
            prepared_write: matches!(req.op_type, WriteOp::Reliable),
            response_needed,
            offset: usize::from(req.offset),
            value,
        };

        if !response_needed {
            self.emit(event);
            return Ok(());
        }
        let response = self.request(request_id, event).await.ok_or(ReqError::Failed)?;
        status_to_result(response.status)
    }
}

fn build_characteristic(
    shared: &Arc<Shared>,
    service: &ServiceDescriptor,
    descriptor: &CharacteristicDescriptor,
) -> Characteristic {
    let characteristic = CharacteristicRef::new(service.uuid, descriptor.uuid);
    let properties = descriptor.properties;

    let read = properties
        .contains(CharacteristicProperties::READ)
        .then(|| {
            let shared = shared.clone();
            CharacteristicRead {
                read: true,
                fun: Box::new(move |req| shared.clone().on_read(characteristic, req).boxed()),
                ..Default::default()
            }
        });

    let write_with_response = properties.contains(CharacteristicProperties::WRITE);
    let write_without_response = properties.contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE);
    let write = (write_with_response || write_without_response).then(|| {
        let shared = shared.clone();
        CharacteristicWrite {
            write: write_with_response,
            write_without_response,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, req| {
                shared.clone().on_write(characteristic, value, req).boxed()
            })),
            ..Default::default()
        }
    });

    let descriptors = descriptor
        .descriptors
        .iter()
        .map(|attribute| {
            let shared = shared.clone();
            let uuid = attribute.uuid;
            Descriptor {
                uuid,
                read: Some(DescriptorRead {
                    read: true,
                    fun: Box::new(move |req| {
                        shared.clone().on_descriptor_read(characteristic, uuid, req).boxed()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect();

    Characteristic {
        uuid: descriptor.uuid,
        read,
        write,
        descriptors,
        ..Default::default()
    }
}

fn build_application(shared: &Arc<Shared>, services: &[ServiceDescriptor]) -> Application {
    Application {
        services: services
            .iter()
            .map(|service| Service {
                uuid: service.uuid,
                primary: service.kind == ServiceKind::Primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| build_characteristic(shared, service, c))
                    .collect(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

// ----------------------------------------------------------------------------
// GATT Server
// ----------------------------------------------------------------------------

pub struct BluezGattServer {
    shared: Arc<Shared>,
    services: Vec<ServiceDescriptor>,
    application: Option<ApplicationHandle>,
}

impl BluezGattServer {
    /// Re-serve the accumulated service set as one application
    async fn serve(&mut self) -> Result<(), BluezError> {
        // Dropping the handle unregisters the previous application
        self.application.take();
        let app = build_application(&self.shared, &self.services);
        let handle = self
            .shared
            .adapter
            .serve_gatt_application(app)
            .await
            .map_err(|e| BluezError::ServeApplication(e.to_string()))?;
        self.application = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl GattServerHandle for BluezGattServer {
    async fn clear_services(&mut self) -> Result<(), TransportError> {
        self.services.clear();
        if self.application.take().is_some() {
            debug!("GATT application unregistered");
        }
        Ok(())
    }

    async fn add_service(&mut self, service: &ServiceDescriptor) -> Result<(), TransportError> {
        self.services.retain(|s| s.uuid != service.uuid);
        self.services.push(service.clone());
        if let Err(e) = self.serve().await {
            self.services.retain(|s| s.uuid != service.uuid);
            return Err(TransportError::ServiceRegistration {
                service: service.uuid.to_string(),
                reason: e.to_string(),
            });
        }
        self.shared.emit(GattServerEvent::ServiceAdded {
            status: GattStatus::Success,
            service: service.uuid,
        });
        Ok(())
    }

    async fn send_response(&mut self, response: GattResponse) -> Result<(), TransportError> {
        let request_id = response.request_id;
        let responder = lock(&self.shared.pending).remove(&request_id);
        let Some(responder) = responder else {
            return Err(TransportError::ResponseFailed {
                request_id,
                reason: "no pending request".into(),
            });
        };
        responder
            .send(response)
            .map_err(|_| TransportError::ResponseFailed {
                request_id,
                reason: "request abandoned by BlueZ".into(),
            })
    }

    async fn close(&mut self) {
        self.application.take();
        self.services.clear();
        // Dropped responders fail their callbacks
        lock(&self.shared.pending).clear();
        lock(&self.shared.devices).clear();
        info!("BlueZ GATT server closed");
    }
}

// ----------------------------------------------------------------------------
// Broadcaster
// ----------------------------------------------------------------------------

pub struct BluezBroadcaster {
    adapter: bluer::Adapter,
    advertisement: Option<AdvertisementHandle>,
}

fn advertise_failure(err: &bluer::Error) -> AdvertiseFailure {
    match err.kind {
        bluer::ErrorKind::NotSupported => AdvertiseFailure::FeatureUnsupported,
        bluer::ErrorKind::AlreadyExists => AdvertiseFailure::AlreadyStarted,
        bluer::ErrorKind::InvalidLength => AdvertiseFailure::DataTooLarge,
        _ => AdvertiseFailure::InternalError,
    }
}

#[async_trait]
impl AdvertisingBroadcaster for BluezBroadcaster {
    async fn start_advertising(
        &mut self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        callback: AdvertisingCallback,
    ) -> Result<(), TransportError> {
        if self.advertisement.is_some() {
            callback.failed(AdvertiseFailure::AlreadyStarted);
            return Ok(());
        }

        let alias = self.adapter.alias().await.unwrap_or_default();
        let name = data.advertised_name(&alias).to_string();
        if !data.fits(&alias) {
            callback.failed(AdvertiseFailure::DataTooLarge);
            return Ok(());
        }

        let interval = settings.mode.interval();
        let advertisement = Advertisement {
            advertisement_type: if settings.connectable {
                AdvertisementType::Peripheral
            } else {
                AdvertisementType::Broadcast
            },
            service_uuids: data.service_uuids.iter().copied().collect::<BTreeSet<_>>(),
            local_name: data.include_device_name.then(|| name.clone()),
            discoverable: Some(true),
            min_interval: Some(interval),
            max_interval: Some(interval),
            ..Default::default()
        };

        match self.adapter.advertise(advertisement).await {
            Ok(handle) => {
                info!(
                    "Advertising as '{}' (session {}, {:?})",
                    name,
                    callback.session(),
                    settings.mode
                );
                self.advertisement = Some(handle);
                callback.started(settings.clone());
            }
            Err(e) => {
                warn!("BlueZ rejected advertisement: {}", e);
                callback.failed(advertise_failure(&e));
            }
        }
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), TransportError> {
        // Dropping the handle stops advertising
        if self.advertisement.take().is_some() {
            info!("Stopped BLE advertising");
        }
        Ok(())
    }
}
