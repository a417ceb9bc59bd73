//! Events consumed from the transport and produced for collaborators
//!
//! Every platform callback is represented as a variant of [`GattServerEvent`]
//! or [`AdvertisingEvent`] and delivered through one [`TransportEventSender`],
//! so the state machines see a single serialized sequence of inputs.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::assembler::AssembledRequest;
use crate::catalog::CharacteristicRef;
use crate::transport::AdvertiseSettings;
use crate::types::{AdvertiseFailure, DeviceAddress, GattStatus, LinkState, RequestId};

// ----------------------------------------------------------------------------
// Consumed Events
// ----------------------------------------------------------------------------

/// Callbacks raised by an open GATT server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattServerEvent {
    ConnectionStateChanged {
        device: DeviceAddress,
        status: GattStatus,
        state: LinkState,
    },
    ServiceAdded {
        status: GattStatus,
        service: Uuid,
    },
    CharacteristicReadRequest {
        device: DeviceAddress,
        request_id: RequestId,
        offset: usize,
        characteristic: CharacteristicRef,
    },
    CharacteristicWriteRequest {
        device: DeviceAddress,
        request_id: RequestId,
        characteristic: CharacteristicRef,
        prepared_write: bool,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    },
    DescriptorReadRequest {
        device: DeviceAddress,
        request_id: RequestId,
        offset: usize,
        characteristic: CharacteristicRef,
        descriptor: Uuid,
    },
    DescriptorWriteRequest {
        device: DeviceAddress,
        request_id: RequestId,
        characteristic: CharacteristicRef,
        descriptor: Uuid,
        prepared_write: bool,
        response_needed: bool,
        offset: usize,
        value: Vec<u8>,
    },
    ExecuteWrite {
        device: DeviceAddress,
        request_id: RequestId,
        execute: bool,
    },
    NotificationSent {
        device: DeviceAddress,
        status: GattStatus,
    },
    MtuChanged {
        device: DeviceAddress,
        mtu: u16,
    },
}

/// Outcome of an advertising start request, tagged with the issuing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertisingEvent {
    StartSuccess {
        session: u64,
        settings_in_effect: AdvertiseSettings,
    },
    StartFailure {
        session: u64,
        error: AdvertiseFailure,
    },
}

impl AdvertisingEvent {
    pub fn session(&self) -> u64 {
        match self {
            AdvertisingEvent::StartSuccess { session, .. }
            | AdvertisingEvent::StartFailure { session, .. } => *session,
        }
    }
}

/// Anything a transport reports back to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Gatt(GattServerEvent),
    Advertising(AdvertisingEvent),
}

impl From<GattServerEvent> for TransportEvent {
    fn from(event: GattServerEvent) -> Self {
        TransportEvent::Gatt(event)
    }
}

impl From<AdvertisingEvent> for TransportEvent {
    fn from(event: AdvertisingEvent) -> Self {
        TransportEvent::Advertising(event)
    }
}

/// Callback sink handed to transports
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

// ----------------------------------------------------------------------------
// Produced Events
// ----------------------------------------------------------------------------

/// Why the hosting process is asked to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownReason {
    AdvertisingFailed(AdvertiseFailure),
    AdvertisingTimedOut,
}

/// Events for the UI and action-dispatch collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PeripheralEvent {
    InitializationFailed { reason: String },
    AdvertisingFailed { error_code: i32, error: AdvertiseFailure },
    CallRequested { number: String },
    MessageRequested { number: String, text: String },
    ShutdownRequested { reason: ShutdownReason },
}

impl PeripheralEvent {
    pub fn advertising_failed(error: AdvertiseFailure) -> Self {
        PeripheralEvent::AdvertisingFailed {
            error_code: error.code(),
            error,
        }
    }
}

impl From<AssembledRequest> for PeripheralEvent {
    fn from(request: AssembledRequest) -> Self {
        match request {
            AssembledRequest::Call { number } => PeripheralEvent::CallRequested { number },
            AssembledRequest::Message { number, text } => {
                PeripheralEvent::MessageRequested { number, text }
            }
        }
    }
}

pub type PeripheralEventSender = mpsc::UnboundedSender<PeripheralEvent>;
pub type PeripheralEventReceiver = mpsc::UnboundedReceiver<PeripheralEvent>;
