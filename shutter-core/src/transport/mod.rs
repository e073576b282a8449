//! Websocket transport to the controller.
//!
//! A [`TransportSession`] owns exactly one connection attempt to one
//! [`Endpoint`](crate::Endpoint). Its lifecycle is tracked by
//! [`ConnectionState`]; every transition is reported once as a
//! [`LifecycleEvent`] on the orchestrator's event channel, alongside the
//! inbound text frames.

mod session;
mod state;

pub use session::{SessionOptions, SessionSender, TransportSession};
pub use state::{ConnectionState, LifecycleEvent, SessionEvent, SessionEventKind};
