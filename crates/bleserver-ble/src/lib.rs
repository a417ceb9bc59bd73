//! Platform Bluetooth bindings for the bleserver peripheral
//!
//! This crate implements the transport adapter traits from `bleserver-core`
//! on top of the host Bluetooth stack.
//!
//! ## Platform Support
//!
//! - **Linux**: GATT server and advertising via the `bluer` crate and BlueZ
//! - **Other platforms**: a fallback adapter that reports the peripheral role
//!   as unavailable, so initialization fails cleanly
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bleserver_ble::PlatformAdapter;
//! use bleserver_core::{Peripheral, PeripheralConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = PlatformAdapter::new(Some("bleserver")).await?;
//! let (peripheral, _handle, _events) = Peripheral::new(Arc::new(adapter), PeripheralConfig::new());
//! peripheral.run().await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod error;

// Public API exports
pub use adapter::fallback::FallbackAdapter;
#[cfg(target_os = "linux")]
pub use adapter::linux::{BluezAdapter, BluezBroadcaster, BluezGattServer};
pub use adapter::PlatformAdapter;
pub use error::BluezError;
