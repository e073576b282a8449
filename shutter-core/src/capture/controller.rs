//! Capture controller: answers "take a photo" requests against a sensor
//! that may still be warming up.
//!
//! A request against a `Ready` sensor captures immediately. Otherwise the
//! controller polls readiness on a fixed interval up to a wall-clock
//! ceiling, emitting countdown events for whoever is listening, and
//! either captures once the sensor is up or fails with
//! [`CaptureError::ReadinessTimeout`].
//!
//! Only one request is in flight at a time; concurrent requests are
//! rejected with [`CaptureError::Busy`] rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::sensor::{CaptureResult, Sensor};
use crate::capture::state::SensorState;
use crate::error::CaptureError;

// ── ReadinessPolicy ──────────────────────────────────────────────

/// Timing of the bounded readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// How often readiness is re-checked while waiting.
    pub poll_interval: Duration,
    /// Maximum wall-clock wait before a request fails.
    pub ceiling: Duration,
    /// First countdown value; one step per elapsed second. 0 disables
    /// countdown events.
    pub countdown_from: u32,
    /// `ScannerVisible` fires once the countdown reaches this value.
    pub scanner_visible_at: u32,
}

impl ReadinessPolicy {
    pub const BASELINE_CEILING: Duration = Duration::from_secs(5);
    /// Ceiling used when captures are also persisted locally.
    pub const PERSISTING_CEILING: Duration = Duration::from_secs(10);

    /// The same policy with the longer ceiling used alongside local
    /// persistence.
    pub fn persisting(self) -> Self {
        Self {
            ceiling: Self::PERSISTING_CEILING,
            ..self
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            ceiling: Self::BASELINE_CEILING,
            countdown_from: 5,
            scanner_visible_at: 1,
        }
    }
}

// ── CaptureEvent ─────────────────────────────────────────────────

/// Presentation signals. Emitted whether or not anyone subscribes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The sensor was not ready; a bounded wait started.
    Waiting { ceiling: Duration },
    /// Countdown tick while waiting.
    Countdown { remaining: u32 },
    /// The countdown reached the visibility threshold.
    ScannerVisible,
    /// A photograph was taken.
    Captured { width: u32, height: u32 },
    /// A request failed in a way the user should hear about.
    Failed(CaptureError),
}

// ── CaptureController ────────────────────────────────────────────

pub struct CaptureController {
    sensor: Arc<dyn Sensor>,
    policy: ReadinessPolicy,
    state: watch::Sender<SensorState>,
    in_flight: AtomicBool,
    events: broadcast::Sender<CaptureEvent>,
}

impl CaptureController {
    pub fn new(sensor: Arc<dyn Sensor>, policy: ReadinessPolicy) -> Arc<Self> {
        let (state, _) = watch::channel(SensorState::Uninitialized);
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            sensor,
            policy,
            state,
            in_flight: AtomicBool::new(false),
            events,
        })
    }

    pub fn state(&self) -> SensorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SensorState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Whether a capture request is currently waiting or capturing.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start warming the sensor up.
    ///
    /// Idempotent: returns `false` without doing anything unless the
    /// sensor is `Uninitialized`.
    pub fn open_sensor(self: &Arc<Self>) -> bool {
        if !self.state.send_if_modified(|s| s.begin_initialize().is_ok()) {
            return false;
        }
        debug!("sensor initializing");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.sensor.initialize().await {
                Ok(()) => {
                    if this.state.send_if_modified(|s| s.mark_ready().is_ok()) {
                        info!("sensor ready");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "sensor initialization failed");
                    this.state.send_if_modified(|s| s.reset().is_ok());
                }
            }
        });
        true
    }

    /// Take a photograph, waiting for the sensor if it is still coming up.
    ///
    /// `cancel` aborts a pending wait or capture; a cancelled request
    /// yields [`CaptureError::Cancelled`] and no result.
    pub async fn request_capture(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<CaptureResult, CaptureError> {
        let Some(_slot) = InFlight::acquire(&self.in_flight) else {
            debug!("capture rejected: another request is in flight");
            return Err(CaptureError::Busy);
        };

        let result = self.run_request(cancel).await;
        match &result {
            Ok(capture) => {
                info!(width = capture.width, height = capture.height, bytes = capture.size(), "captured");
                self.emit(CaptureEvent::Captured {
                    width: capture.width,
                    height: capture.height,
                });
            }
            Err(e) if e.is_surfaced() => {
                warn!(error = %e, "capture request failed");
                self.emit(CaptureEvent::Failed(e.clone()));
            }
            Err(e) => debug!(error = %e, "capture request dropped"),
        }
        result
    }

    async fn run_request(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<CaptureResult, CaptureError> {
        self.open_sensor();
        if !self.refresh_readiness() {
            self.wait_for_readiness(cancel).await?;
        }
        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        self.capture(cancel).await
    }

    /// `true` once the sensor is `Ready`, promoting `Initializing` when
    /// the hardware reports ready through `Sensor::is_ready`.
    fn refresh_readiness(&self) -> bool {
        let current = self.state();
        match current {
            SensorState::Ready => true,
            SensorState::Initializing if self.sensor.is_ready() => {
                self.state.send_if_modified(|s| s.mark_ready().is_ok());
                self.state() == SensorState::Ready
            }
            _ => false,
        }
    }

    async fn wait_for_readiness(&self, cancel: &CancellationToken) -> Result<(), CaptureError> {
        let policy = &self.policy;
        info!(ceiling = ?policy.ceiling, "sensor not ready; waiting");
        self.emit(CaptureEvent::Waiting {
            ceiling: policy.ceiling,
        });

        let started = Instant::now();
        let mut ticker = tokio::time::interval(policy.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut countdown = Countdown::new(policy.countdown_from, policy.scanner_visible_at);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
                _ = ticker.tick() => {}
            }

            let waited = started.elapsed();
            if self.refresh_readiness() {
                debug!(?waited, "sensor became ready");
                return Ok(());
            }
            // The wait starts with the sensor initializing; falling back
            // means initialization failed and readiness will not come.
            if self.state() == SensorState::Uninitialized {
                return Err(CaptureError::CaptureFailed(
                    "sensor initialization failed".into(),
                ));
            }
            for event in countdown.advance(waited) {
                self.emit(event);
            }
            if waited >= policy.ceiling {
                return Err(CaptureError::ReadinessTimeout(policy.ceiling));
            }
        }
    }

    async fn capture(&self, cancel: &CancellationToken) -> Result<CaptureResult, CaptureError> {
        if !self.state.send_if_modified(|s| s.begin_capture().is_ok()) {
            return Err(CaptureError::CaptureFailed(format!(
                "sensor not ready ({})",
                self.state()
            )));
        }

        let _capturing = Capturing(&self.state);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CaptureError::Cancelled),
            result = self.sensor.capture() => {
                result.map_err(|e| CaptureError::CaptureFailed(e.to_string()))
            }
        }
    }

    fn emit(&self, event: CaptureEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// The single in-flight slot; released on drop, including on
/// cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Returns the sensor to `Ready` when the capture ends, even if the
/// request future is dropped mid-capture.
struct Capturing<'a>(&'a watch::Sender<SensorState>);

impl Drop for Capturing<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|s| s.finish_capture().is_ok());
    }
}

struct Countdown {
    from: u32,
    visible_at: u32,
    last: Option<u32>,
    visible: bool,
}

impl Countdown {
    fn new(from: u32, visible_at: u32) -> Self {
        Self {
            from,
            visible_at,
            last: None,
            visible: false,
        }
    }

    fn advance(&mut self, waited: Duration) -> Vec<CaptureEvent> {
        let mut out = Vec::new();
        if self.from == 0 {
            return out;
        }

        let elapsed = u32::try_from(waited.as_secs()).unwrap_or(u32::MAX);
        let remaining = self.from.saturating_sub(elapsed);
        if self.last != Some(remaining) {
            self.last = Some(remaining);
            out.push(CaptureEvent::Countdown { remaining });
        }
        if !self.visible && remaining <= self.visible_at {
            self.visible = true;
            out.push(CaptureEvent::ScannerVisible);
        }
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Notify;

    use crate::error::ShutterError;

    /// Scriptable sensor: initialization either takes `init_delay` or
    /// waits for `init_signal`.
    #[derive(Default)]
    struct MockSensor {
        ready: AtomicBool,
        init_delay: Option<Duration>,
        init_signal: Notify,
        init_calls: AtomicUsize,
        capture_calls: AtomicUsize,
        fail_capture: AtomicBool,
        fail_init: AtomicBool,
        capture_gate: Option<Notify>,
    }

    impl MockSensor {
        fn warm() -> Self {
            Self {
                ready: AtomicBool::new(true),
                init_delay: Some(Duration::ZERO),
                ..Default::default()
            }
        }

        fn warming_for(delay: Duration) -> Self {
            Self {
                init_delay: Some(delay),
                ..Default::default()
            }
        }

        fn never_ready() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Sensor for MockSensor {
        async fn initialize(&self) -> Result<(), ShutterError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            match self.init_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => self.init_signal.notified().await,
            }
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(ShutterError::Sensor("no device".into()));
            }
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn capture(&self) -> Result<CaptureResult, ShutterError> {
            self.capture_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.capture_gate {
                gate.notified().await;
            }
            if self.fail_capture.load(Ordering::SeqCst) {
                return Err(ShutterError::Sensor("lens jammed".into()));
            }
            Ok(CaptureResult {
                raw_bytes: Bytes::from_static(b"\xFF\xD8jpeg"),
                width: 640,
                height: 480,
                source_uri: "file:///tmp/photo.jpg".into(),
                device_tag: "10.0.0.2".into(),
            })
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    fn controller(sensor: &Arc<MockSensor>) -> Arc<CaptureController> {
        CaptureController::new(sensor.clone(), ReadinessPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn ready_sensor_captures_immediately() {
        let sensor = Arc::new(MockSensor::warm());
        let ctl = controller(&sensor);
        let start = Instant::now();

        let result = ctl.request_capture(&CancellationToken::new()).await.unwrap();

        assert_eq!(result.width, 640);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(ctl.state(), SensorState::Ready);
        assert_eq!(sensor.capture_calls.load(Ordering::SeqCst), 1);
        assert!(!ctl.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_late_readiness() {
        let sensor = Arc::new(MockSensor::warming_for(Duration::from_secs(2)));
        let ctl = controller(&sensor);
        let start = Instant::now();

        let result = ctl.request_capture(&CancellationToken::new()).await;

        assert!(result.is_ok());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < ctl.policy().ceiling);
        assert_eq!(ctl.state(), SensorState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_just_before_ceiling_still_captures() {
        let sensor = Arc::new(MockSensor::warming_for(Duration::from_millis(4_900)));
        let ctl = controller(&sensor);

        assert!(ctl.request_capture(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_ceiling_not_before() {
        let sensor = Arc::new(MockSensor::never_ready());
        let ctl = controller(&sensor);
        let start = Instant::now();

        let result = ctl.request_capture(&CancellationToken::new()).await;

        assert_eq!(
            result.unwrap_err(),
            CaptureError::ReadinessTimeout(ReadinessPolicy::BASELINE_CEILING)
        );
        let waited = start.elapsed();
        assert!(waited >= ReadinessPolicy::BASELINE_CEILING);
        assert!(waited < ReadinessPolicy::BASELINE_CEILING + ctl.policy().poll_interval);
        assert_eq!(ctl.state(), SensorState::Initializing);
        assert_eq!(sensor.capture_calls.load(Ordering::SeqCst), 0);

        // Hardware comes up later: the state machine still reaches Ready.
        sensor.init_signal.notify_one();
        let mut state = ctl.subscribe_state();
        state.wait_for(|s| *s == SensorState::Ready).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persisting_policy_extends_the_ceiling() {
        let sensor = Arc::new(MockSensor::warming_for(Duration::from_secs(7)));
        let ctl = CaptureController::new(sensor.clone(), ReadinessPolicy::default().persisting());

        assert!(ctl.request_capture(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialization_ends_the_wait_early() {
        let sensor = Arc::new(MockSensor::warming_for(Duration::from_secs(2)));
        sensor.fail_init.store(true, Ordering::SeqCst);
        let ctl = controller(&sensor);
        let start = Instant::now();

        let err = ctl.request_capture(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, CaptureError::CaptureFailed(_)), "{err:?}");
        assert!(start.elapsed() < ctl.policy().ceiling);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(ctl.state(), SensorState::Uninitialized);
        assert_eq!(sensor.capture_calls.load(Ordering::SeqCst), 0);
        assert!(!ctl.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_request_is_busy() {
        let sensor = Arc::new(MockSensor {
            capture_gate: Some(Notify::new()),
            ..MockSensor::warm()
        });
        let ctl = controller(&sensor);

        let first = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.request_capture(&CancellationToken::new()).await }
        });
        let mut state = ctl.subscribe_state();
        state.wait_for(|s| *s == SensorState::Capturing).await.unwrap();

        let second = ctl.request_capture(&CancellationToken::new()).await;
        assert_eq!(second.unwrap_err(), CaptureError::Busy);

        if let Some(gate) = &sensor.capture_gate {
            gate.notify_one();
        }
        assert!(first.await.unwrap().is_ok());
        assert_eq!(sensor.capture_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.state(), SensorState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn request_while_waiting_is_busy() {
        let sensor = Arc::new(MockSensor::never_ready());
        let ctl = controller(&sensor);

        let pending = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.request_capture(&CancellationToken::new()).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(ctl.is_busy());
        assert_eq!(
            ctl.request_capture(&CancellationToken::new()).await.unwrap_err(),
            CaptureError::Busy
        );
        assert!(pending.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_returns_to_ready() {
        let sensor = Arc::new(MockSensor::warm());
        sensor.fail_capture.store(true, Ordering::SeqCst);
        let ctl = controller(&sensor);

        let result = ctl.request_capture(&CancellationToken::new()).await;
        assert!(matches!(result, Err(CaptureError::CaptureFailed(_))));
        assert_eq!(ctl.state(), SensorState::Ready);

        sensor.fail_capture.store(false, Ordering::SeqCst);
        assert!(ctl.request_capture(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_releases_the_slot() {
        let sensor = Arc::new(MockSensor::never_ready());
        let ctl = controller(&sensor);
        let cancel = CancellationToken::new();

        let pending = tokio::spawn({
            let ctl = ctl.clone();
            let cancel = cancel.clone();
            async move { ctl.request_capture(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        cancel.cancel();

        assert_eq!(pending.await.unwrap().unwrap_err(), CaptureError::Cancelled);
        assert!(!ctl.is_busy());
        assert_eq!(ctl.state(), SensorState::Initializing);
        assert_eq!(sensor.capture_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_never_fires_capture() {
        let sensor = Arc::new(MockSensor::warm());
        let ctl = controller(&sensor);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ctl.request_capture(&cancel).await;
        assert_eq!(result.unwrap_err(), CaptureError::Cancelled);
        assert_eq!(sensor.capture_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_sensor_is_idempotent() {
        let sensor = Arc::new(MockSensor::warming_for(Duration::from_millis(300)));
        let ctl = controller(&sensor);

        assert!(ctl.open_sensor());
        assert!(!ctl.open_sensor());
        let mut state = ctl.subscribe_state();
        state.wait_for(|s| *s == SensorState::Ready).await.unwrap();
        assert!(!ctl.open_sensor());
        assert_eq!(sensor.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_events_while_waiting() {
        let sensor = Arc::new(MockSensor::never_ready());
        let ctl = controller(&sensor);
        let mut events = ctl.subscribe_events();

        let _ = ctl.request_capture(&CancellationToken::new()).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                CaptureEvent::Waiting {
                    ceiling: ReadinessPolicy::BASELINE_CEILING
                },
                CaptureEvent::Countdown { remaining: 5 },
                CaptureEvent::Countdown { remaining: 4 },
                CaptureEvent::Countdown { remaining: 3 },
                CaptureEvent::Countdown { remaining: 2 },
                CaptureEvent::Countdown { remaining: 1 },
                CaptureEvent::ScannerVisible,
                CaptureEvent::Countdown { remaining: 0 },
                CaptureEvent::Failed(CaptureError::ReadinessTimeout(
                    ReadinessPolicy::BASELINE_CEILING
                )),
            ]
        );
    }

    #[test]
    fn countdown_disabled_when_from_is_zero() {
        let mut countdown = Countdown::new(0, 1);
        assert!(countdown.advance(Duration::from_secs(3)).is_empty());
    }
}
