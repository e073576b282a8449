//! Log-based presentation of session and capture activity.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shutter_core::{CaptureEvent, Command, LifecycleEvent, OrchestratorHandle, Presentation};

/// Reports lifecycle changes and received commands through `tracing`.
#[derive(Debug, Default)]
pub struct LogPresentation;

impl Presentation for LogPresentation {
    fn on_lifecycle(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Opened { endpoint, local_addr } => match local_addr {
                Some(addr) => info!("connected to {endpoint} from {addr}"),
                None => info!("connected to {endpoint}"),
            },
            LifecycleEvent::Closed { endpoint } => info!("disconnected from {endpoint}"),
            LifecycleEvent::Errored { endpoint, reason } => {
                warn!("failed to connect to {endpoint}: {reason}")
            }
        }
    }

    fn on_command(&self, command: &Command) {
        info!("controller requested {command}");
    }
}

/// Log countdown and capture signals until the orchestrator goes away.
pub fn spawn_event_logger(handle: &OrchestratorHandle) -> JoinHandle<()> {
    let mut events = handle.subscribe_capture_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => debug!("skipped {n} capture events"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &CaptureEvent) {
    match event {
        CaptureEvent::Waiting { ceiling } => info!("camera warming up; waiting up to {ceiling:?}"),
        CaptureEvent::Countdown { remaining } => info!("{remaining}"),
        CaptureEvent::ScannerVisible => info!("scanner visible"),
        CaptureEvent::Captured { width, height } => info!("photo taken ({width}x{height})"),
        CaptureEvent::Failed(e) => warn!("photo failed: {e}"),
    }
}
