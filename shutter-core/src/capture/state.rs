//! Sensor lifecycle state machine.
//!
//! ```text
//!  Uninitialized ──► Initializing ──► Ready ──► Capturing
//!        ▲                │             ▲           │
//!        └── init failed ─┘             └───────────┘
//! ```
//!
//! `Capturing` is only reachable from `Ready`, so a sensor can never go
//! from `Uninitialized` straight to `Capturing`.

use std::fmt;

use crate::error::ShutterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Capturing,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Capturing => write!(f, "Capturing"),
        }
    }
}

impl SensorState {
    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Uninitialized`.
    pub fn begin_initialize(&mut self) -> Result<(), ShutterError> {
        match self {
            Self::Uninitialized => {
                *self = Self::Initializing;
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot initialize: sensor already started",
            )),
        }
    }

    /// Hardware-ready signal. Valid from: `Initializing`.
    pub fn mark_ready(&mut self) -> Result<(), ShutterError> {
        match self {
            Self::Initializing => {
                *self = Self::Ready;
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot mark ready: not in Initializing state",
            )),
        }
    }

    /// Initialization failed. Valid from: `Initializing`.
    pub fn reset(&mut self) -> Result<(), ShutterError> {
        match self {
            Self::Initializing => {
                *self = Self::Uninitialized;
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot reset: not in Initializing state",
            )),
        }
    }

    /// Valid from: `Ready`.
    pub fn begin_capture(&mut self) -> Result<(), ShutterError> {
        match self {
            Self::Ready => {
                *self = Self::Capturing;
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot capture: sensor not ready",
            )),
        }
    }

    /// Capture finished, successfully or not. Valid from: `Capturing`.
    pub fn finish_capture(&mut self) -> Result<(), ShutterError> {
        match self {
            Self::Capturing => {
                *self = Self::Ready;
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot finish capture: not in Capturing state",
            )),
        }
    }
}
