//! # shutter-core
//!
//! Core library for the shutter remote capture agent.
//!
//! This crate contains:
//! - **Protocol types**: `Command`, `MessageType`, `ArtifactMessage` and the JSON wire codec
//! - **Endpoint**: normalized `ws://`/`wss://` connection targets
//! - **Transport**: `TransportSession`, one websocket connection with lifecycle events
//! - **Router**: `CommandRouter`, decode-and-dispatch of inbound frames
//! - **Capture**: `SensorState` machine and `CaptureController` with bounded readiness wait
//! - **Artifact**: `ArtifactPipeline` size budgeting, re-encoding and local persistence
//! - **Task**: `TaskPool` for tracking spawned capture jobs with cancellation
//! - **Orchestrator**: `SessionOrchestrator` actor and its `OrchestratorHandle`
//! - **Error**: `ShutterError`, a typed `thiserror`-based error hierarchy

pub mod artifact;
pub mod capture;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod router;
pub mod task;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use artifact::{
    Artifact, ArtifactPipeline, ArtifactPolicy, ArtifactSummary, Dimensions, DirectoryStorage,
    EncodePlan, Permission, Reencoded, Reencoder, Storage,
};
pub use capture::{
    CaptureController, CaptureEvent, CaptureResult, ReadinessPolicy, Sensor, SensorState,
};
pub use endpoint::Endpoint;
pub use error::{CaptureError, DecodeError, PersistenceWarning, ShutterError};
pub use message::{ArtifactMessage, Command, MessageType};
pub use orchestrator::{
    CaptureOutcome, OrchestratorConfig, OrchestratorHandle, Presentation, SessionOrchestrator,
};
pub use router::{CommandRouter, Dispatch};
pub use task::{TaskEvent, TaskPool};
pub use transport::{
    ConnectionState, LifecycleEvent, SessionEvent, SessionEventKind, SessionOptions,
    SessionSender, TransportSession,
};
