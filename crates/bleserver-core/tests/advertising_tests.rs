//! Advertising lifecycle tests
//!
//! All tests run with a paused clock so the 10-minute advertising timeout can
//! be exercised deterministically.

use std::time::Duration;

use bleserver_core::advertising::TimeoutReceiver;
use bleserver_core::events::{PeripheralEventReceiver, TransportEventReceiver};
use bleserver_core::{
    AdvertiseFailure, AdvertiseMode, AdvertisingController, AdvertisingEvent, AdvertisingState,
    BluetoothAdapter,
    LifecycleAction, MemoryAdapter, PeripheralConfig, PeripheralEvent, ShutdownReason,
    TimeoutElapsed, TransportEvent, TransportEventSender, DEFAULT_ADVERTISING_TIMEOUT,
};
use tokio::sync::mpsc;

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

struct Harness {
    controller: AdvertisingController,
    adapter: MemoryAdapter,
    timeouts: TimeoutReceiver,
    events: PeripheralEventReceiver,
    sink: TransportEventSender,
    transport: TransportEventReceiver,
}

impl Harness {
    async fn new(adapter: MemoryAdapter, config: PeripheralConfig) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (sink, transport) = mpsc::unbounded_channel();
        let (mut controller, timeouts) = AdvertisingController::new(&config, events_tx);
        controller.attach(adapter.broadcaster().await.expect("broadcaster"));
        Self {
            controller,
            adapter,
            timeouts,
            events,
            sink,
            transport,
        }
    }

    async fn start(&mut self) -> LifecycleAction {
        self.controller.start(self.sink.clone()).await.expect("start")
    }

    /// Feed queued advertising callbacks back into the controller
    fn pump(&mut self) -> Vec<LifecycleAction> {
        let mut actions = Vec::new();
        while let Ok(event) = self.transport.try_recv() {
            if let TransportEvent::Advertising(event) = event {
                actions.push(self.controller.handle_event(event));
            }
        }
        actions
    }

    fn advertising_failures(&mut self) -> Vec<i32> {
        let mut codes = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let PeripheralEvent::AdvertisingFailed { error_code, .. } = event {
                codes.push(error_code);
            }
        }
        codes
    }
}

async fn harness() -> Harness {
    Harness::new(MemoryAdapter::default(), PeripheralConfig::default()).await
}

// ----------------------------------------------------------------------------
// Start and Stop
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_start_reaches_advertising() {
    let mut h = harness().await;
    let state = h.controller.state_handle();
    assert_eq!(state.current_state(), AdvertisingState::Idle);

    assert_eq!(h.start().await, LifecycleAction::None);
    assert_eq!(h.controller.current_state(), AdvertisingState::Starting);

    assert_eq!(h.pump(), vec![LifecycleAction::None]);
    assert_eq!(state.current_state(), AdvertisingState::Advertising);
    assert!(h.adapter.is_advertising());

    let settings = h.adapter.lock().last_settings.clone().unwrap();
    assert_eq!(settings.mode, AdvertiseMode::LowPower);
    assert_eq!(settings.timeout, None);
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_opens_one_session() {
    let mut h = harness().await;
    h.start().await;
    let generation = h.controller.session().map(|s| s.generation);
    let deadline = h.controller.session().map(|s| s.deadline);

    tokio::time::advance(Duration::from_secs(60)).await;
    h.start().await;
    h.pump();
    h.start().await;

    assert_eq!(h.adapter.lock().advertising_starts, 1);
    assert_eq!(h.controller.session().map(|s| s.generation), generation);
    assert_eq!(h.controller.session().map(|s| s.deadline), deadline);

    // Only one timer was armed
    tokio::time::sleep(DEFAULT_ADVERTISING_TIMEOUT).await;
    assert!(h.timeouts.recv().await.is_some());
    assert!(h.timeouts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let mut h = harness().await;
    h.controller.stop().await;
    assert_eq!(h.controller.current_state(), AdvertisingState::Idle);

    h.start().await;
    h.pump();
    h.controller.stop().await;
    h.controller.stop().await;

    assert_eq!(h.controller.current_state(), AdvertisingState::Stopped);
    assert_eq!(h.adapter.lock().advertising_stops, 1);
    assert!(!h.adapter.is_advertising());
    assert!(h.controller.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_opens_new_session() {
    let mut h = harness().await;
    h.start().await;
    h.pump();
    let first = h.controller.session().map(|s| s.generation).unwrap();
    h.controller.stop().await;

    h.start().await;
    h.pump();
    let second = h.controller.session().map(|s| s.generation).unwrap();
    assert!(second > first);
    assert_eq!(h.controller.current_state(), AdvertisingState::Advertising);
}

// ----------------------------------------------------------------------------
// Failures
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_start_failure_requests_shutdown() {
    let adapter = MemoryAdapter::default().with_advertising_failure(AdvertiseFailure::TooManyAdvertisers);
    let mut h = Harness::new(adapter, PeripheralConfig::default()).await;
    h.start().await;

    assert_eq!(
        h.pump(),
        vec![LifecycleAction::Shutdown(ShutdownReason::AdvertisingFailed(
            AdvertiseFailure::TooManyAdvertisers
        ))]
    );
    assert_eq!(h.controller.current_state(), AdvertisingState::Failed);
    assert_eq!(h.advertising_failures(), vec![2]);
    assert!(h.controller.session().is_none());

    // The timer of the failed session never fires
    tokio::time::sleep(DEFAULT_ADVERTISING_TIMEOUT * 2).await;
    assert!(h.timeouts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_payload_fails_with_data_too_large() {
    let adapter = MemoryAdapter::new("an-unreasonably-long-device-name-for-ads");
    let mut h = Harness::new(adapter, PeripheralConfig::default()).await;
    h.start().await;
    h.pump();
    assert_eq!(h.advertising_failures(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_configured_name_replaces_adapter_name() {
    let adapter = MemoryAdapter::new("an-unreasonably-long-device-name-for-ads");
    let config = PeripheralConfig::default().with_device_name("relay");
    let mut h = Harness::new(adapter, config).await;
    h.start().await;
    h.pump();
    assert_eq!(h.controller.current_state(), AdvertisingState::Advertising);
    let data = h.adapter.lock().last_data.clone().unwrap();
    assert_eq!(data.local_name.as_deref(), Some("relay"));
}

#[tokio::test(start_paused = true)]
async fn test_omitting_name_keeps_payload_within_budget() {
    let adapter = MemoryAdapter::new("an-unreasonably-long-device-name-for-ads");
    let config = PeripheralConfig::default().with_include_device_name(false);
    let mut h = Harness::new(adapter, config).await;
    h.start().await;
    h.pump();
    assert_eq!(h.controller.current_state(), AdvertisingState::Advertising);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_of_stopped_session_does_not_touch_new_one() {
    let mut h = harness().await;
    h.start().await;
    let stopped = h.controller.session().map(|s| s.generation).unwrap();
    h.controller.stop().await;
    h.start().await;

    // A failure for the stopped session arrives after the restart
    let action = h.controller.handle_event(AdvertisingEvent::StartFailure {
        session: stopped,
        error: AdvertiseFailure::InternalError,
    });
    assert_eq!(action, LifecycleAction::None);
    assert_eq!(h.controller.current_state(), AdvertisingState::Starting);
    assert!(h.advertising_failures().is_empty());

    // Queued confirmations: the stopped session's is dropped, the new one's applies
    assert_eq!(h.pump(), vec![LifecycleAction::None, LifecycleAction::None]);
    assert_eq!(h.controller.current_state(), AdvertisingState::Advertising);
    assert!(h.controller.session().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_outcome_after_stop_is_ignored() {
    let adapter = MemoryAdapter::default().with_advertising_failure(AdvertiseFailure::InternalError);
    let mut h = Harness::new(adapter, PeripheralConfig::default()).await;
    h.start().await;
    h.controller.stop().await;

    assert_eq!(h.pump(), vec![LifecycleAction::None]);
    assert_eq!(h.controller.current_state(), AdvertisingState::Stopped);
    assert!(h.advertising_failures().is_empty());
}

// ----------------------------------------------------------------------------
// Timeout
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_once_and_stops() {
    let mut h = harness().await;
    h.start().await;
    h.pump();

    let elapsed = h.timeouts.recv().await.expect("timer fired");
    assert_eq!(
        h.controller.on_timeout(elapsed).await,
        LifecycleAction::Shutdown(ShutdownReason::AdvertisingTimedOut)
    );
    assert_eq!(h.advertising_failures(), vec![AdvertiseFailure::TimedOut.code()]);
    assert_eq!(h.controller.current_state(), AdvertisingState::Stopped);
    assert!(!h.adapter.is_advertising());

    // Replayed expiry and a later stop are both no-ops
    assert_eq!(h.controller.on_timeout(elapsed).await, LifecycleAction::None);
    h.controller.stop().await;
    assert!(h.advertising_failures().is_empty());
    assert_eq!(h.adapter.lock().advertising_stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_honours_configured_duration() {
    let config = PeripheralConfig::default().with_advertising_timeout(Duration::from_secs(30));
    let mut h = Harness::new(MemoryAdapter::default(), config).await;
    let started = tokio::time::Instant::now();
    h.start().await;
    h.pump();

    h.timeouts.recv().await.expect("timer fired");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(30));
    assert!(waited < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_while_start_unconfirmed() {
    let adapter = MemoryAdapter::default().with_pending_advertising();
    let mut h = Harness::new(adapter, PeripheralConfig::default()).await;
    h.start().await;
    assert_eq!(h.controller.current_state(), AdvertisingState::Starting);

    let elapsed = h.timeouts.recv().await.expect("timer fired");
    assert!(matches!(
        h.controller.on_timeout(elapsed).await,
        LifecycleAction::Shutdown(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_timer() {
    let mut h = harness().await;
    h.start().await;
    h.pump();
    h.controller.stop().await;

    tokio::time::sleep(DEFAULT_ADVERTISING_TIMEOUT + Duration::from_secs(1)).await;
    assert!(h.timeouts.try_recv().is_err());
    assert!(h.advertising_failures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queued_expiry_after_stop_is_ignored() {
    let mut h = harness().await;
    h.start().await;
    h.pump();
    let generation = h.controller.session().map(|s| s.generation).unwrap();
    h.controller.stop().await;

    // An expiry already in flight when stop ran
    let action = h.controller.on_timeout(TimeoutElapsed { generation }).await;
    assert_eq!(action, LifecycleAction::None);
    assert!(h.advertising_failures().is_empty());
    assert_eq!(h.controller.current_state(), AdvertisingState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_of_previous_session_is_ignored() {
    let mut h = harness().await;
    h.start().await;
    h.pump();
    let old = h.controller.session().map(|s| s.generation).unwrap();
    h.controller.stop().await;
    h.start().await;
    h.pump();

    let action = h
        .controller
        .on_timeout(TimeoutElapsed { generation: old })
        .await;
    assert_eq!(action, LifecycleAction::None);
    assert_eq!(h.controller.current_state(), AdvertisingState::Advertising);
}
