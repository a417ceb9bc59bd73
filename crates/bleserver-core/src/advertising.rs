//! Advertising lifecycle controller
//!
//! Owns the single advertising session and its timeout timer. The timer runs
//! as a spawned sleep that reports back through a channel tagged with the
//! session generation; any expiry carrying a stale generation is dropped, so a
//! cancelled timer can never act even if its message is already queued.
//!
//! ```text
//! Idle -> Starting -> Advertising -> Stopped
//!             \            \
//!              +-> Failed   +-> Stopped (timeout)
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::catalog::ADVERTISED_SERVICE_UUID;
use crate::config::PeripheralConfig;
use crate::errors::{PeripheralError, Result};
use crate::events::{
    AdvertisingEvent, PeripheralEvent, PeripheralEventSender, ShutdownReason, TransportEventSender,
};
use crate::transport::{
    AdvertiseData, AdvertiseSettings, AdvertisingBroadcaster, AdvertisingCallback,
};
use crate::types::AdvertiseFailure;

// ----------------------------------------------------------------------------
// Advertising State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AdvertisingState {
    Idle,
    Starting,
    Advertising,
    Stopped,
    Failed,
}

impl AdvertisingState {
    /// Whether a session is currently open
    pub fn is_active(self) -> bool {
        matches!(self, AdvertisingState::Starting | AdvertisingState::Advertising)
    }
}

/// Thread-safe read-only view of the advertising state
#[derive(Debug, Clone)]
pub struct AdvertisingStateHandle {
    receiver: watch::Receiver<AdvertisingState>,
}

impl AdvertisingStateHandle {
    pub fn current_state(&self) -> AdvertisingState {
        *self.receiver.borrow()
    }

    pub fn is_advertising(&self) -> bool {
        self.current_state() == AdvertisingState::Advertising
    }

    /// Wait for the next state change and return the new state
    pub async fn changed(&mut self) -> Option<AdvertisingState> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }

    /// Wait until `predicate` holds for the current state
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&AdvertisingState) -> bool,
    ) -> Option<AdvertisingState> {
        self.receiver.wait_for(predicate).await.ok().map(|state| *state)
    }
}

// ----------------------------------------------------------------------------
// Session and Timer
// ----------------------------------------------------------------------------

/// Expiry of the timer armed for session `generation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutElapsed {
    pub generation: u64,
}

pub type TimeoutSender = mpsc::UnboundedSender<TimeoutElapsed>;
pub type TimeoutReceiver = mpsc::UnboundedReceiver<TimeoutElapsed>;

/// One run of advertising
#[derive(Debug)]
pub struct AdvertisingSession {
    pub generation: u64,
    pub started_at: Instant,
    pub deadline: Instant,
    timer: JoinHandle<()>,
}

impl AdvertisingSession {
    fn cancel(self) {
        self.timer.abort();
    }
}

/// What the owner of the controller must do after an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    None,
    Shutdown(ShutdownReason),
}

// ----------------------------------------------------------------------------
// Advertising Controller
// ----------------------------------------------------------------------------

pub struct AdvertisingController {
    broadcaster: Option<Box<dyn AdvertisingBroadcaster>>,
    settings: AdvertiseSettings,
    data: AdvertiseData,
    timeout: Duration,
    generation: u64,
    session: Option<AdvertisingSession>,
    state: watch::Sender<AdvertisingState>,
    timer_tx: TimeoutSender,
    events: PeripheralEventSender,
}

impl AdvertisingController {
    /// Create a controller and the receiver its timer reports to
    pub fn new(config: &PeripheralConfig, events: PeripheralEventSender) -> (Self, TimeoutReceiver) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(AdvertisingState::Idle);

        // The controller enforces its own timeout, so the transport's is disabled
        let settings = AdvertiseSettings {
            mode: config.advertise_mode,
            connectable: config.connectable,
            timeout: None,
        };
        let data = AdvertiseData {
            service_uuids: vec![ADVERTISED_SERVICE_UUID],
            include_device_name: config.include_device_name,
            local_name: config.device_name.clone(),
        };

        let controller = Self {
            broadcaster: None,
            settings,
            data,
            timeout: config.advertising_timeout,
            generation: 0,
            session: None,
            state,
            timer_tx,
            events,
        };
        (controller, timer_rx)
    }

    /// Hand over the broadcaster obtained from the adapter
    pub fn attach(&mut self, broadcaster: Box<dyn AdvertisingBroadcaster>) {
        self.broadcaster = Some(broadcaster);
    }

    pub fn current_state(&self) -> AdvertisingState {
        *self.state.borrow()
    }

    pub fn state_handle(&self) -> AdvertisingStateHandle {
        AdvertisingStateHandle {
            receiver: self.state.subscribe(),
        }
    }

    pub fn session(&self) -> Option<&AdvertisingSession> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &AdvertiseSettings {
        &self.settings
    }

    pub fn data(&self) -> &AdvertiseData {
        &self.data
    }

    fn set_state(&self, state: AdvertisingState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Advertising state {:?} -> {:?}", previous, state);
        }
    }

    fn cancel_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Cancelling advertising timer for session {}", session.generation);
            session.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Open an advertising session and arm its timeout
    ///
    /// A no-op while a session is already open. The outcome is reported later
    /// through `sink` as an [`AdvertisingEvent`].
    pub async fn start(&mut self, sink: TransportEventSender) -> Result<LifecycleAction> {
        let state = self.current_state();
        if state.is_active() {
            debug!("Advertising already {:?}; ignoring start", state);
            return Ok(LifecycleAction::None);
        }
        if self.broadcaster.is_none() {
            return Err(PeripheralError::InvalidState {
                operation: "start advertising",
                state: "without a broadcaster",
            });
        }

        self.generation += 1;
        let generation = self.generation;
        let started_at = Instant::now();
        let deadline = started_at + self.timeout;

        let timer_tx = self.timer_tx.clone();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = timer_tx.send(TimeoutElapsed { generation });
        });
        self.session = Some(AdvertisingSession {
            generation,
            started_at,
            deadline,
            timer,
        });
        self.set_state(AdvertisingState::Starting);

        info!(
            "Starting advertising (session {}, mode {:?}, timeout {:?})",
            generation, self.settings.mode, self.timeout
        );
        let submitted = match self.broadcaster.as_mut() {
            Some(broadcaster) => {
                let callback = AdvertisingCallback::new(generation, sink);
                broadcaster
                    .start_advertising(&self.settings, &self.data, callback)
                    .await
            }
            None => Ok(()),
        };
        if let Err(e) = submitted {
            error!("Advertising start request rejected: {}", e);
            return Ok(self.on_start_failure(AdvertiseFailure::InternalError));
        }
        Ok(LifecycleAction::None)
    }

    pub fn on_start_success(&mut self, settings_in_effect: &AdvertiseSettings) {
        if self.current_state() != AdvertisingState::Starting {
            debug!("Ignoring start confirmation while {:?}", self.current_state());
            return;
        }
        info!("Advertising started with {:?}", settings_in_effect);
        self.set_state(AdvertisingState::Advertising);
    }

    /// Record a failed start; the peripheral cannot continue without advertising
    pub fn on_start_failure(&mut self, error: AdvertiseFailure) -> LifecycleAction {
        if !self.current_state().is_active() {
            warn!(
                "Ignoring advertising failure ({}) while {:?}",
                error,
                self.current_state()
            );
            return LifecycleAction::None;
        }

        error!("Advertising failed: {} (code {})", error, error.code());
        self.cancel_session();
        self.set_state(AdvertisingState::Failed);
        let _ = self.events.send(PeripheralEvent::advertising_failed(error));
        LifecycleAction::Shutdown(ShutdownReason::AdvertisingFailed(error))
    }

    /// Stop the open session, if any; safe to call repeatedly
    pub async fn stop(&mut self) {
        if !self.current_state().is_active() {
            return;
        }
        self.cancel_session();
        self.stop_broadcaster().await;
        self.set_state(AdvertisingState::Stopped);
        info!("Advertising stopped");
    }

    /// React to a timer expiry
    pub async fn on_timeout(&mut self, elapsed: TimeoutElapsed) -> LifecycleAction {
        let current = self.session.as_ref().map(|session| session.generation);
        if current != Some(elapsed.generation) {
            debug!(
                "Ignoring stale advertising timeout for session {}",
                elapsed.generation
            );
            return LifecycleAction::None;
        }

        warn!("Advertising timed out after {:?}", self.timeout);
        self.session = None;
        self.stop_broadcaster().await;
        self.set_state(AdvertisingState::Stopped);
        let _ = self
            .events
            .send(PeripheralEvent::advertising_failed(AdvertiseFailure::TimedOut));
        LifecycleAction::Shutdown(ShutdownReason::AdvertisingTimedOut)
    }

    /// Single entry point for advertising callbacks
    ///
    /// Outcomes reported for any session but the open one are dropped.
    pub fn handle_event(&mut self, event: AdvertisingEvent) -> LifecycleAction {
        let current = self.session.as_ref().map(|session| session.generation);
        if current != Some(event.session()) {
            debug!(
                "Ignoring advertising outcome for stale session {}",
                event.session()
            );
            return LifecycleAction::None;
        }
        match event {
            AdvertisingEvent::StartSuccess {
                settings_in_effect, ..
            } => {
                self.on_start_success(&settings_in_effect);
                LifecycleAction::None
            }
            AdvertisingEvent::StartFailure { error, .. } => self.on_start_failure(error),
        }
    }

    async fn stop_broadcaster(&mut self) {
        if let Some(broadcaster) = self.broadcaster.as_mut() {
            if let Err(e) = broadcaster.stop_advertising().await {
                warn!("Failed to stop advertising: {}", e);
            }
        }
    }
}

impl Drop for AdvertisingController {
    fn drop(&mut self) {
        self.cancel_session();
    }
}
