//! Domain-specific error types for the capture agent.
//!
//! All fallible operations return `Result<T, ShutterError>`.
//! Nothing in this crate is fatal to the process: every error is typed
//! so the caller can decide whether to surface, log, or absorb it.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the capture agent core.
#[derive(Debug, Error)]
pub enum ShutterError {
    // ── Configuration Errors ─────────────────────────────────────
    /// The endpoint string is not a usable websocket address.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        endpoint: String,
        reason: &'static str,
    },

    // ── Connection Errors ────────────────────────────────────────
    /// Opening or writing to the websocket failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// `send` was called while the session is not `Open`. The message
    /// has been dropped.
    #[error("not connected")]
    NotConnected,

    /// An mpsc/oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── State Machine Errors ─────────────────────────────────────
    /// A state transition was attempted from a state that does not
    /// allow it.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Protocol Errors ──────────────────────────────────────────
    /// An inbound frame could not be decoded into a command.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// JSON encoding of an outbound message failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Capture Errors ───────────────────────────────────────────
    /// A capture request did not produce a result.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// The sensor capability reported a failure.
    #[error("sensor error: {0}")]
    Sensor(String),

    /// The re-encode capability reported a failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── I/O ──────────────────────────────────────────────────────
    /// Local filesystem I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DecodeError ───────────────────────────────────────────────────

/// Why an inbound frame was rejected by the router.
///
/// Decode errors are logged and swallowed; they never tear down a
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is not a JSON object with a string `type` field.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The `type` field does not name a known command.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// The `message` body of a known type did not match its schema.
    #[error("invalid {kind} body: {reason}")]
    InvalidMessage { kind: &'static str, reason: String },

    /// An encoded image string is not a base64 JPEG data URI.
    #[error("invalid data uri: {0}")]
    InvalidDataUri(String),
}

// ── CaptureError ──────────────────────────────────────────────────

/// Outcome of a capture request that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The sensor never signalled ready within the ceiling.
    #[error("sensor not ready after {0:?}")]
    ReadinessTimeout(Duration),

    /// The sensor capability failed while capturing.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// Another capture request is already waiting or capturing.
    #[error("capture already in progress")]
    Busy,

    /// The owning session was torn down while the request was pending.
    #[error("capture request cancelled")]
    Cancelled,
}

impl CaptureError {
    /// Whether this failure is reported to the presentation layer.
    ///
    /// `Busy` and `Cancelled` are absorbed internally.
    pub fn is_surfaced(&self) -> bool {
        matches!(self, Self::ReadinessTimeout(_) | Self::CaptureFailed(_))
    }
}

// ── PersistenceWarning ────────────────────────────────────────────

/// Non-fatal failure of the durable-storage copy. Transmission of the
/// artifact proceeds regardless.
#[derive(Debug, Error)]
pub enum PersistenceWarning {
    /// The storage permission was not granted.
    #[error("storage permission denied")]
    PermissionDenied,

    /// Writing the copy failed.
    #[error("persist failed: {0}")]
    Failed(#[source] ShutterError),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for ShutterError {
    fn from(s: String) -> Self {
        ShutterError::Other(s)
    }
}

impl From<&str> for ShutterError {
    fn from(s: &str) -> Self {
        ShutterError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ShutterError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ShutterError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ShutterError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ShutterError::ChannelClosed
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ShutterError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ShutterError::Connection(e.to_string())
    }
}
