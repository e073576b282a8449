//! Inbound command dispatch.
//!
//! The router never fails: anything that does not decode is logged and
//! dropped, leaving the session and the sensor untouched.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capture::CaptureController;
use crate::message::Command;

/// What the orchestrator should do after routing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Sensor warm-up was requested; `started` is false if it was already
    /// warming or warm.
    SensorWarming { started: bool },
    /// Run exactly one capture request.
    Capture,
    /// Decoded but not acted upon.
    Ignored,
}

pub struct CommandRouter {
    controller: Arc<CaptureController>,
}

impl CommandRouter {
    pub fn new(controller: Arc<CaptureController>) -> Self {
        Self { controller }
    }

    /// Decode a raw frame, logging and discarding anything invalid.
    pub fn decode(&self, raw: &str) -> Option<Command> {
        match Command::decode(raw) {
            Ok(command) => {
                debug!(%command, "command received");
                Some(command)
            }
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping undecodable frame");
                None
            }
        }
    }

    /// Act on a decoded command.
    ///
    /// `OpenSensor` takes effect here; a capture is left to the caller so
    /// it can run as a cancellable job.
    pub fn dispatch(&self, command: &Command) -> Dispatch {
        match command {
            Command::OpenSensor => Dispatch::SensorWarming {
                started: self.controller.open_sensor(),
            },
            Command::CaptureNow => Dispatch::Capture,
            Command::CancelTask => {
                debug!("cancel task has no handler");
                Dispatch::Ignored
            }
            Command::ReceiveArtifact(_) => {
                debug!("ignoring inbound artifact");
                Dispatch::Ignored
            }
        }
    }
}
