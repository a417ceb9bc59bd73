//! Host application runs over the in-memory backend

use std::sync::Arc;
use std::time::Duration;

use bleserver_cli::{AppConfig, BleServerApp, CliError};
use bleserver_core::catalog::{CALL_NUMBER, MESSAGE_NUMBER, MESSAGE_TEXT};
use bleserver_core::{
    AdvertiseFailure, BluetoothAdapter, DeviceAddress, MemoryAdapter, PeripheralError,
    ShutdownReason, TransportError,
};

fn config(timeout_secs: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.peripheral.advertising_timeout_secs = timeout_secs;
    config
}

#[tokio::test(start_paused = true)]
async fn test_timeout_ends_run_cleanly() {
    let app = BleServerApp::new(config(30));
    let summary = app
        .run_with_adapter(Arc::new(MemoryAdapter::default()))
        .await
        .unwrap();
    assert_eq!(summary.reason, Some(ShutdownReason::AdvertisingTimedOut));
    assert_eq!(summary.dispatched, 0);
}

#[tokio::test(start_paused = true)]
async fn test_completed_requests_are_dispatched() {
    let adapter = MemoryAdapter::default();
    let central = DeviceAddress::new("11:22:33:44:55:66");
    let app = BleServerApp::new(config(60));

    let run = {
        let adapter = adapter.clone();
        tokio::spawn(async move { app.run_with_adapter(Arc::new(adapter)).await })
    };
    while !adapter.is_advertising() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    adapter.connect(&central);
    adapter.write(&central, CALL_NUMBER, "911");
    adapter.write(&central, MESSAGE_NUMBER, "42");
    adapter.write(&central, MESSAGE_TEXT, "hello");

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.reason, Some(ShutdownReason::AdvertisingTimedOut));
}

#[tokio::test(start_paused = true)]
async fn test_advertising_failure_is_an_error() {
    let adapter =
        MemoryAdapter::default().with_advertising_failure(AdvertiseFailure::FeatureUnsupported);
    let app = BleServerApp::new(config(60));
    let result = app.run_with_adapter(Arc::new(adapter)).await;
    assert!(matches!(
        result,
        Err(CliError::AdvertisingFailed(AdvertiseFailure::FeatureUnsupported))
    ));
}

#[tokio::test]
async fn test_initialization_failure_is_an_error() {
    let adapter = MemoryAdapter::default()
        .with_open_failure(TransportError::AdapterUnavailable("powered off".into()));
    let app = BleServerApp::new(config(60));
    let result = app.run_with_adapter(Arc::new(adapter)).await;
    assert!(matches!(
        result,
        Err(CliError::Peripheral(PeripheralError::Initialization(_)))
    ));
}

#[tokio::test]
async fn test_memory_backend_uses_configured_name() {
    let mut config = config(60);
    config.cli.backend = bleserver_cli::Backend::Memory;
    config.peripheral.device_name = Some("relay".into());
    let app = BleServerApp::new(config);
    let adapter = app.build_adapter().await.unwrap();
    assert_eq!(adapter.device_name().await.as_deref(), Some("relay"));
}
