//! Session orchestrator: the actor that wires transport, router, capture
//! controller and artifact pipeline together.
//!
//! One task owns the current [`TransportSession`] and reacts to three
//! inputs: control messages from [`OrchestratorHandle`]s, session events
//! (lifecycle and inbound frames) and completions of capture jobs.
//!
//! ```text
//! frame ─► CommandRouter ─► Dispatch::Capture ─► capture job (TaskPool)
//!                                                  │
//!            CaptureController::request_capture ◄──┘
//!                          │
//!            ArtifactPipeline::process ─► send ∥ persist
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactPipeline, ArtifactSummary};
use crate::capture::{CaptureController, CaptureEvent, SensorState};
use crate::endpoint::Endpoint;
use crate::error::{CaptureError, ShutterError};
use crate::message::Command;
use crate::router::{CommandRouter, Dispatch};
use crate::task::{TaskEvent, TaskPool};
use crate::transport::{
    LifecycleEvent, SessionEvent, SessionEventKind, SessionOptions, SessionSender,
    TransportSession,
};

/// How long shutdown waits for the websocket close handshake.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ── Presentation ─────────────────────────────────────────────────

/// Receives the orchestrator's outward notifications.
///
/// Called from the orchestrator task; implementations must not block.
pub trait Presentation: Send + Sync + 'static {
    /// A session opened, closed or failed.
    fn on_lifecycle(&self, event: &LifecycleEvent);

    /// A command was decoded from the current session.
    fn on_command(&self, command: &Command);
}

/// Discards every notification.
impl Presentation for () {
    fn on_lifecycle(&self, _event: &LifecycleEvent) {}

    fn on_command(&self, _command: &Command) {}
}

// ── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub endpoint: Endpoint,
    pub session: SessionOptions,
    /// Rebuild the session this long after it drops on its own.
    /// `None` keeps a dead session dead until the endpoint is re-applied.
    pub reconnect_delay: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session: SessionOptions::default(),
            reconnect_delay: None,
        }
    }
}

// ── Capture outcome ──────────────────────────────────────────────

/// How one capture job ended.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The artifact was sent; `saved` is the local copy, if any.
    Delivered {
        summary: ArtifactSummary,
        saved: Option<PathBuf>,
    },
    /// The artifact was built but could not be sent.
    Undelivered {
        summary: ArtifactSummary,
        reason: ShutterError,
    },
    /// No artifact was produced.
    Rejected(CaptureError),
}

// ── Handle ───────────────────────────────────────────────────────

#[derive(Debug)]
enum Control {
    UpdateEndpoint {
        endpoint: Endpoint,
        ack: oneshot::Sender<()>,
    },
    CaptureNow,
    Shutdown,
}

/// Cloneable control surface of a running [`SessionOrchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    control: mpsc::Sender<Control>,
    controller: Arc<CaptureController>,
    last_artifact: watch::Receiver<Option<ArtifactSummary>>,
}

impl OrchestratorHandle {
    /// Switch to `endpoint`.
    ///
    /// Resolves once the old session is being torn down and the new
    /// connection attempt has started; it does not wait for the new
    /// session to open. Re-applying the current endpoint only reconnects
    /// if the session has already closed or failed.
    pub async fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), ShutterError> {
        let (ack, applied) = oneshot::channel();
        self.control
            .send(Control::UpdateEndpoint { endpoint, ack })
            .await?;
        applied.await?;
        Ok(())
    }

    /// Take a photo as if `TAKE_PHOTO` had arrived.
    pub async fn capture_now(&self) -> Result<(), ShutterError> {
        self.control.send(Control::CaptureNow).await?;
        Ok(())
    }

    /// Stop the orchestrator, closing the session and cancelling jobs.
    pub async fn shutdown(&self) -> Result<(), ShutterError> {
        self.control.send(Control::Shutdown).await?;
        Ok(())
    }

    pub fn sensor_state(&self) -> watch::Receiver<SensorState> {
        self.controller.subscribe_state()
    }

    /// Summary of the most recently delivered artifact.
    pub fn last_artifact(&self) -> watch::Receiver<Option<ArtifactSummary>> {
        self.last_artifact.clone()
    }

    /// Countdown, scanner and capture result signals.
    pub fn subscribe_capture_events(&self) -> broadcast::Receiver<CaptureEvent> {
        self.controller.subscribe_events()
    }
}

// ── SessionOrchestrator ──────────────────────────────────────────

enum Step {
    Control(Option<Control>),
    Session(SessionEvent),
    Job(TaskEvent<CaptureOutcome>),
    Reconnect,
}

pub struct SessionOrchestrator {
    endpoint: Endpoint,
    options: SessionOptions,
    reconnect_delay: Option<Duration>,

    session: Option<TransportSession>,
    generation: u64,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    reconnect_at: Option<Instant>,

    control: mpsc::Receiver<Control>,
    router: CommandRouter,
    controller: Arc<CaptureController>,
    pipeline: Arc<ArtifactPipeline>,
    presentation: Arc<dyn Presentation>,
    jobs: TaskPool<CaptureOutcome>,
    last_artifact: watch::Sender<Option<ArtifactSummary>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        controller: Arc<CaptureController>,
        pipeline: Arc<ArtifactPipeline>,
        presentation: Arc<dyn Presentation>,
    ) -> (Self, OrchestratorHandle) {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(config.session.outbound_capacity.max(16));
        let (last_tx, last_rx) = watch::channel(None);

        let handle = OrchestratorHandle {
            control: control_tx,
            controller: Arc::clone(&controller),
            last_artifact: last_rx,
        };

        let orchestrator = Self {
            endpoint: config.endpoint,
            options: config.session,
            reconnect_delay: config.reconnect_delay,
            session: None,
            generation: 0,
            events_tx,
            events_rx,
            reconnect_at: None,
            control: control_rx,
            router: CommandRouter::new(Arc::clone(&controller)),
            controller,
            pipeline,
            presentation,
            jobs: TaskPool::new(),
            last_artifact: last_tx,
        };
        (orchestrator, handle)
    }

    /// Connect and serve until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!(endpoint = %self.endpoint, "orchestrator starting");
        self.open_session();

        loop {
            let reconnect_at = self.reconnect_at;
            let step = tokio::select! {
                control = self.control.recv() => Step::Control(control),
                Some(event) = self.events_rx.recv() => Step::Session(event),
                Some(done) = self.jobs.recv() => Step::Job(done),
                _ = sleep_until(reconnect_at) => Step::Reconnect,
            };

            match step {
                Step::Control(None) | Step::Control(Some(Control::Shutdown)) => break,
                Step::Control(Some(Control::UpdateEndpoint { endpoint, ack })) => {
                    self.apply_endpoint(endpoint);
                    let _ = ack.send(());
                }
                Step::Control(Some(Control::CaptureNow)) => {
                    info!("manual capture requested");
                    self.spawn_capture();
                }
                Step::Session(event) => self.on_session_event(event),
                Step::Job(done) => self.on_job_done(done),
                Step::Reconnect => {
                    self.reconnect_at = None;
                    info!(endpoint = %self.endpoint, "reconnecting");
                    self.open_session();
                }
            }
        }

        self.teardown().await;
    }

    // ── Sessions ─────────────────────────────────────────────────

    fn apply_endpoint(&mut self, endpoint: Endpoint) {
        let live = self
            .session
            .as_ref()
            .is_some_and(|s| !s.state().is_terminal());
        if endpoint == self.endpoint && live {
            debug!(%endpoint, "endpoint unchanged; keeping session");
            return;
        }
        info!(from = %self.endpoint, to = %endpoint, "endpoint updated");
        self.endpoint = endpoint;
        self.open_session();
    }

    /// Replace the current session with a fresh one to `self.endpoint`.
    fn open_session(&mut self) {
        if let Some(old) = self.session.take() {
            debug!(endpoint = %old.endpoint(), generation = old.generation(), "closing session");
            old.close();
        }
        self.jobs.cancel_all();
        self.reconnect_at = None;

        self.generation += 1;
        self.session = Some(TransportSession::connect(
            self.endpoint.clone(),
            self.generation,
            self.options.clone(),
            self.events_tx.clone(),
        ));
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let current = event.generation == self.generation;
        match event.kind {
            SessionEventKind::Lifecycle(lifecycle) => {
                self.presentation.on_lifecycle(&lifecycle);
                if current && lifecycle.is_terminal() {
                    self.jobs.cancel_all();
                    if let Some(delay) = self.reconnect_delay {
                        debug!(?delay, "scheduling reconnect");
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                }
            }
            SessionEventKind::Frame(text) => {
                if !current {
                    debug!(generation = event.generation, "dropping frame from superseded session");
                    return;
                }
                let Some(command) = self.router.decode(&text) else {
                    return;
                };
                self.presentation.on_command(&command);
                match self.router.dispatch(&command) {
                    Dispatch::Capture => self.spawn_capture(),
                    Dispatch::SensorWarming { started } => {
                        debug!(started, "sensor warm-up requested");
                    }
                    Dispatch::Ignored => {}
                }
            }
        }
    }

    // ── Capture jobs ─────────────────────────────────────────────

    fn spawn_capture(&mut self) {
        let Some(sender) = self.session.as_ref().map(TransportSession::sender) else {
            warn!("capture requested without a session");
            return;
        };
        let controller = Arc::clone(&self.controller);
        let pipeline = Arc::clone(&self.pipeline);
        let id = self
            .jobs
            .spawn(move |cancel| capture_job(controller, pipeline, sender, cancel));
        debug!(job = id, "capture job started");
    }

    fn on_job_done(&mut self, event: TaskEvent<CaptureOutcome>) {
        match event {
            TaskEvent::Finished(id, CaptureOutcome::Delivered { summary, saved }) => {
                info!(
                    job = id,
                    width = summary.width,
                    height = summary.height,
                    bytes = summary.payload_len,
                    saved = ?saved,
                    "artifact delivered"
                );
                self.last_artifact.send_replace(Some(summary));
            }
            TaskEvent::Finished(id, CaptureOutcome::Undelivered { summary, reason }) => {
                warn!(job = id, bytes = summary.payload_len, error = %reason, "artifact not delivered");
            }
            TaskEvent::Finished(id, CaptureOutcome::Rejected(e)) => {
                debug!(job = id, error = %e, "capture job produced nothing");
            }
            TaskEvent::Cancelled(id) => debug!(job = id, "capture job cancelled"),
        }
    }

    async fn teardown(&mut self) {
        info!("orchestrator stopping");
        self.jobs.cancel_all();
        if let Some(session) = self.session.take() {
            session.close();
            if tokio::time::timeout(SHUTDOWN_GRACE, session.closed()).await.is_err() {
                error!(endpoint = %session.endpoint(), "session did not close in time");
            }
        }
    }
}

/// One capture request, start to finish.
async fn capture_job(
    controller: Arc<CaptureController>,
    pipeline: Arc<ArtifactPipeline>,
    sender: SessionSender,
    cancel: CancellationToken,
) -> CaptureOutcome {
    let capture = match controller.request_capture(&cancel).await {
        Ok(capture) => capture,
        Err(e) => return CaptureOutcome::Rejected(e),
    };

    let artifact = pipeline.process(capture).await;
    if cancel.is_cancelled() {
        return CaptureOutcome::Rejected(CaptureError::Cancelled);
    }
    let summary = artifact.summary();

    let frame = match artifact.encode_frame() {
        Ok(frame) => frame,
        Err(reason) => return CaptureOutcome::Undelivered { summary, reason },
    };

    let (sent, persisted) = tokio::join!(sender.send(frame), pipeline.persist(&artifact));
    let saved = match persisted {
        Ok(path) => path,
        Err(warning) => {
            warn!(%warning, "local copy not saved");
            None
        }
    };

    match sent {
        Ok(()) => CaptureOutcome::Delivered { summary, saved },
        Err(reason) => CaptureOutcome::Undelivered { summary, reason },
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
