//! Connection state machine and the events it emits.
//!
//! ```text
//!  Connecting ──► Open ──► Closed
//!       │           │
//!       ├───────────┴────► Errored
//!       └────────────────► Closed   (closed before the handshake finished)
//! ```
//!
//! `Closed` and `Errored` are terminal: a session is never reopened, the
//! orchestrator builds a new one instead.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::endpoint::Endpoint;
use crate::error::ShutterError;

// ── ConnectionState ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Websocket handshake in progress.
    #[default]
    Connecting,

    /// Handshake complete; frames flow both ways.
    Open {
        /// When the session entered `Open`.
        since: Instant,
        /// Local address of the underlying TCP socket, when plain TCP.
        local_addr: Option<SocketAddr>,
    },

    /// Closed by either side.
    Closed,

    /// Connect or I/O failure.
    Errored { reason: String },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open { .. } => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::Errored { .. } => write!(f, "Errored"),
        }
    }
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// `Closed` or `Errored`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored { .. })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Open { local_addr, .. } => *local_addr,
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Connecting`.
    pub fn mark_open(&mut self, local_addr: Option<SocketAddr>) -> Result<(), ShutterError> {
        match self {
            Self::Connecting => {
                *self = Self::Open {
                    since: Instant::now(),
                    local_addr,
                };
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot open: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Open`.
    pub fn mark_closed(&mut self) -> Result<(), ShutterError> {
        match self {
            Self::Connecting | Self::Open { .. } => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot close: session already terminated",
            )),
        }
    }

    /// Valid from: `Connecting`, `Open`.
    pub fn mark_errored(&mut self, reason: String) -> Result<(), ShutterError> {
        match self {
            Self::Connecting | Self::Open { .. } => {
                *self = Self::Errored { reason };
                Ok(())
            }
            _ => Err(ShutterError::InvalidTransition(
                "cannot fail: session already terminated",
            )),
        }
    }
}

// ── Events ───────────────────────────────────────────────────────

/// A connection lifecycle notification, one per state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Opened {
        endpoint: Endpoint,
        local_addr: Option<SocketAddr>,
    },
    Closed {
        endpoint: Endpoint,
    },
    Errored {
        endpoint: Endpoint,
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Opened { endpoint, .. }
            | Self::Closed { endpoint }
            | Self::Errored { endpoint, .. } => endpoint,
        }
    }

    /// `Closed` or `Errored`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Opened { .. })
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { endpoint, .. } => write!(f, "opened {endpoint}"),
            Self::Closed { endpoint } => write!(f, "closed {endpoint}"),
            Self::Errored { endpoint, reason } => write!(f, "error on {endpoint}: {reason}"),
        }
    }
}

/// Everything a session reports to its owner, tagged with the session
/// generation so stale sessions can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub generation: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    Lifecycle(LifecycleEvent),
    /// One inbound text frame, in arrival order.
    Frame(String),
}

// ── Tests ────────────────────────────────────────────────────────
