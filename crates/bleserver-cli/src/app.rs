//! Host application wiring the peripheral to the action dispatcher

use std::sync::Arc;

use bleserver_ble::PlatformAdapter;
use bleserver_core::{
    BluetoothAdapter, MemoryAdapter, Peripheral, PeripheralEvent, ShutdownReason,
};
use tracing::{error, info, warn};

use crate::config::{AppConfig, Backend};
use crate::dispatch::ActionDispatcher;
use crate::error::{CliError, Result};

/// What a completed run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Why the peripheral stopped itself, `None` after a signal
    pub reason: Option<ShutdownReason>,
    /// Requests handed to the dispatcher
    pub dispatched: usize,
}

/// The bleserver host process
pub struct BleServerApp {
    config: AppConfig,
    dispatcher: ActionDispatcher,
}

impl BleServerApp {
    pub fn new(config: AppConfig) -> Self {
        let dispatcher = ActionDispatcher::new(&config.dispatch);
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the adapter for the configured backend
    pub async fn build_adapter(&self) -> Result<Arc<dyn BluetoothAdapter>> {
        let name = self.config.peripheral.device_name.as_deref();
        match self.config.cli.backend {
            Backend::Bluez => {
                let adapter = PlatformAdapter::new(name).await?;
                if !adapter.is_supported() {
                    warn!("Peripheral role is not supported on this platform");
                }
                Ok(Arc::new(adapter))
            }
            Backend::Memory => {
                info!("Using in-memory Bluetooth backend");
                let adapter = match name {
                    Some(name) => MemoryAdapter::new(name),
                    None => MemoryAdapter::default(),
                };
                Ok(Arc::new(adapter))
            }
        }
    }

    /// Run on the configured backend until shutdown
    pub async fn run(&self) -> Result<RunSummary> {
        let adapter = self.build_adapter().await?;
        self.run_with_adapter(adapter).await
    }

    /// Serve on `adapter` until the peripheral stops or Ctrl-C is received
    pub async fn run_with_adapter(&self, adapter: Arc<dyn BluetoothAdapter>) -> Result<RunSummary> {
        let (peripheral, handle, mut events) =
            Peripheral::new(adapter, self.config.peripheral.to_peripheral_config());
        let mut task = tokio::spawn(peripheral.run());
        let mut dispatched = 0;
        let mut interrupted = false;

        let outcome = loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    dispatched += self.handle_event(&event)?;
                }
                result = &mut task => break result,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    info!("Received shutdown signal");
                    interrupted = true;
                    if let Err(e) = handle.shutdown().await {
                        warn!("Peripheral already stopped: {}", e);
                    }
                }
            }
        };

        // Events emitted while the peripheral was tearing down
        while let Ok(event) = events.try_recv() {
            dispatched += self.handle_event(&event)?;
        }

        let reason = outcome.map_err(|e| CliError::Task(e.to_string()))??;
        match reason {
            Some(ShutdownReason::AdvertisingFailed(failure)) => {
                Err(CliError::AdvertisingFailed(failure))
            }
            reason => Ok(RunSummary { reason, dispatched }),
        }
    }

    /// Report one produced event and dispatch it, returning how many
    /// requests were handed off
    fn handle_event(&self, event: &PeripheralEvent) -> Result<usize> {
        if self.config.cli.json_events {
            println!("{}", serde_json::to_string(event)?);
        } else {
            Self::log_event(event);
        }

        match self.dispatcher.dispatch(event) {
            Ok(Some(_)) => Ok(1),
            Ok(None) => Ok(0),
            Err(e) => {
                error!("{}", e);
                Ok(0)
            }
        }
    }

    fn log_event(event: &PeripheralEvent) {
        match event {
            PeripheralEvent::InitializationFailed { reason } => {
                error!("Peripheral initialization failed: {}", reason)
            }
            PeripheralEvent::AdvertisingFailed { error_code, error } => {
                warn!("Advertising failed: {} (code {})", error, error_code)
            }
            PeripheralEvent::CallRequested { number } => info!("Call requested to {}", number),
            PeripheralEvent::MessageRequested { number, text } => {
                info!("Message requested to {} ({} bytes)", number, text.len())
            }
            PeripheralEvent::ShutdownRequested { reason } => {
                info!("Peripheral requested shutdown: {:?}", reason)
            }
        }
    }
}
