//! Peripheral actor tying the GATT server and advertising controller together
//!
//! All transport callbacks, timer expiries and external commands are served
//! from one `tokio::select!` loop, so the state machines never see concurrent
//! inputs and need no locking.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::advertising::{
    AdvertisingController, AdvertisingState, AdvertisingStateHandle, LifecycleAction,
    TimeoutReceiver,
};
use crate::config::PeripheralConfig;
use crate::errors::{PeripheralError, Result};
use crate::events::{
    PeripheralEvent, PeripheralEventReceiver, PeripheralEventSender, ShutdownReason,
    TransportEvent, TransportEventReceiver, TransportEventSender,
};
use crate::gatt_server::{GattServer, ServerState};
use crate::transport::BluetoothAdapter;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

// ----------------------------------------------------------------------------
// Commands and Handle
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralCommand {
    StartAdvertising,
    StopAdvertising,
    Shutdown,
}

/// Cloneable control handle for a running [`Peripheral`]
#[derive(Debug, Clone)]
pub struct PeripheralHandle {
    commands: mpsc::Sender<PeripheralCommand>,
    state: AdvertisingStateHandle,
}

impl PeripheralHandle {
    async fn send(&self, command: PeripheralCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PeripheralError::ChannelClosed("peripheral command"))
    }

    pub async fn start_advertising(&self) -> Result<()> {
        self.send(PeripheralCommand::StartAdvertising).await
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        self.send(PeripheralCommand::StopAdvertising).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(PeripheralCommand::Shutdown).await
    }

    pub fn advertising_state(&self) -> AdvertisingState {
        self.state.current_state()
    }

    /// Watchable view of the advertising state
    pub fn state_handle(&self) -> AdvertisingStateHandle {
        self.state.clone()
    }
}

// ----------------------------------------------------------------------------
// Peripheral
// ----------------------------------------------------------------------------

pub struct Peripheral {
    adapter: Arc<dyn BluetoothAdapter>,
    server: GattServer,
    advertising: AdvertisingController,
    commands: mpsc::Receiver<PeripheralCommand>,
    transport_tx: TransportEventSender,
    transport_rx: TransportEventReceiver,
    timeouts: TimeoutReceiver,
    events: PeripheralEventSender,
}

impl Peripheral {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        config: PeripheralConfig,
    ) -> (Self, PeripheralHandle, PeripheralEventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let server = GattServer::new(&config, events.clone());
        let (advertising, timeouts) = AdvertisingController::new(&config, events.clone());

        let handle = PeripheralHandle {
            commands: commands_tx,
            state: advertising.state_handle(),
        };

        let peripheral = Self {
            adapter,
            server,
            advertising,
            commands,
            transport_tx,
            transport_rx,
            timeouts,
            events,
        };
        (peripheral, handle, events_rx)
    }

    pub fn server_state(&self) -> ServerState {
        self.server.state()
    }

    /// Run until shut down
    ///
    /// Returns the reason when the peripheral terminated itself, `None` after
    /// an explicit shutdown, and an error when initialization failed.
    pub async fn run(mut self) -> Result<Option<ShutdownReason>> {
        if let Err(e) = self.initialize().await {
            self.server.close().await;
            return Err(e);
        }

        let mut outcome = match self.start_advertising().await {
            LifecycleAction::None => None,
            LifecycleAction::Shutdown(reason) => Some(reason),
        };

        while outcome.is_none() {
            let action = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All peripheral handles dropped");
                        break;
                    }
                },
                Some(event) = self.transport_rx.recv() => Some(self.handle_transport_event(event).await),
                Some(elapsed) = self.timeouts.recv() => Some(self.advertising.on_timeout(elapsed).await),
            };

            match action {
                Some(LifecycleAction::Shutdown(reason)) => outcome = Some(reason),
                Some(LifecycleAction::None) => {}
                None => break,
            }
        }

        if let Some(reason) = outcome {
            info!("Peripheral shutting down: {:?}", reason);
            let _ = self
                .events
                .send(PeripheralEvent::ShutdownRequested { reason });
        }
        self.teardown().await;
        Ok(outcome)
    }

    /// Acquire the broadcaster, open the server and register the catalog
    async fn initialize(&mut self) -> Result<()> {
        let broadcaster = match self.adapter.broadcaster().await {
            Ok(broadcaster) => broadcaster,
            Err(e) => {
                error!("Advertising not available: {}", e);
                self.notify_initialization_failed(e.to_string());
                return Err(PeripheralError::Initialization(e));
            }
        };
        self.advertising.attach(broadcaster);

        self.server
            .open(self.adapter.as_ref(), self.transport_tx.clone())
            .await?;

        if let Err(e) = self.server.register_services().await {
            error!("Failed to register GATT services: {}", e);
            self.notify_initialization_failed(e.to_string());
            return Err(match e {
                PeripheralError::Transport(e) => PeripheralError::Initialization(e),
                other => other,
            });
        }

        if let Some(name) = self.adapter.device_name().await {
            info!("Peripheral ready as {}", name);
        }
        Ok(())
    }

    fn notify_initialization_failed(&self, reason: String) {
        let _ = self
            .events
            .send(PeripheralEvent::InitializationFailed { reason });
    }

    async fn start_advertising(&mut self) -> LifecycleAction {
        match self.advertising.start(self.transport_tx.clone()).await {
            Ok(action) => action,
            Err(e) => {
                warn!("Cannot start advertising: {}", e);
                LifecycleAction::None
            }
        }
    }

    /// `None` ends the loop without a shutdown reason
    async fn handle_command(&mut self, command: PeripheralCommand) -> Option<LifecycleAction> {
        debug!("Peripheral command {:?}", command);
        match command {
            PeripheralCommand::StartAdvertising => Some(self.start_advertising().await),
            PeripheralCommand::StopAdvertising => {
                self.advertising.stop().await;
                Some(LifecycleAction::None)
            }
            PeripheralCommand::Shutdown => None,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> LifecycleAction {
        match event {
            TransportEvent::Gatt(event) => {
                self.server.handle_event(event).await;
                LifecycleAction::None
            }
            TransportEvent::Advertising(event) => self.advertising.handle_event(event),
        }
    }

    async fn teardown(&mut self) {
        self.advertising.stop().await;
        self.server.close().await;
        let failures = self.server.response_failures();
        if failures > 0 {
            warn!("{} GATT responses were not delivered", failures);
        }
        info!("Peripheral stopped");
    }
}
