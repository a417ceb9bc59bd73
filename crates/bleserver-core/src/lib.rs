//! Peripheral-role protocol core for a BLE call and message relay
//!
//! The peripheral advertises a single service, exposes a voice-call service and
//! a message service over GATT, and turns characteristic writes from a
//! connected central into complete call and message requests.
//!
//! ## Architecture
//!
//! - [`catalog`] - Static description of the GATT services
//! - [`assembler`] - Correlation of independent writes into complete requests
//! - [`gatt_server`] - GATT request/response state machine
//! - [`advertising`] - Advertising lifecycle with its timeout
//! - [`transport`] - Interface implemented by platform Bluetooth bindings
//! - [`peripheral`] - Actor serializing all inputs onto one task
//! - [`memory`] - In-memory transport for tests and dry runs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bleserver_core::{MemoryAdapter, Peripheral, PeripheralConfig, PeripheralEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = Arc::new(MemoryAdapter::default());
//! let (peripheral, handle, mut events) = Peripheral::new(adapter, PeripheralConfig::new());
//! let task = tokio::spawn(peripheral.run());
//!
//! while let Some(event) = events.recv().await {
//!     if let PeripheralEvent::CallRequested { number } = event {
//!         println!("call {}", number);
//!         handle.shutdown().await?;
//!     }
//! }
//! task.await??;
//! # Ok(())
//! # }
//! ```

pub mod advertising;
pub mod assembler;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod gatt_server;
pub mod memory;
pub mod peripheral;
pub mod transport;
pub mod types;

// Public API exports
pub use advertising::{
    AdvertisingController, AdvertisingState, AdvertisingStateHandle, LifecycleAction,
    TimeoutElapsed,
};
pub use assembler::{AssembledRequest, RequestAssembler};
pub use catalog::{
    describe_services, AttributeDescriptor, CharacteristicDescriptor, CharacteristicRef,
    ServiceDescriptor, ADVERTISED_SERVICE_UUID,
};
pub use config::{PeripheralConfig, DEFAULT_ADVERTISING_TIMEOUT};
pub use errors::{PeripheralError, Result, TransportError};
pub use events::{
    AdvertisingEvent, GattServerEvent, PeripheralEvent, PeripheralEventReceiver, ShutdownReason,
    TransportEvent, TransportEventSender,
};
pub use gatt_server::{GattServer, ServerState};
pub use memory::MemoryAdapter;
pub use peripheral::{Peripheral, PeripheralCommand, PeripheralHandle};
pub use transport::{
    AdvertiseData, AdvertiseMode, AdvertiseSettings, AdvertisingBroadcaster, AdvertisingCallback,
    BluetoothAdapter, GattResponse, GattServerHandle, MAX_ADVERTISING_PAYLOAD,
};
pub use types::{AdvertiseFailure, DeviceAddress, GattStatus, LinkState, RequestId};
