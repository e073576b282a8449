//! Capture readiness: sensor lifecycle and the "take a photo now" path.
//!
//! | Module       | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | `sensor`     | [`Sensor`] capability trait and [`CaptureResult`]     |
//! | `state`      | [`SensorState`] with validated transitions            |
//! | `controller` | [`CaptureController`]: bounded wait, countdown, gating |

pub mod controller;
pub mod sensor;
pub mod state;

pub use controller::{CaptureController, CaptureEvent, ReadinessPolicy};
pub use sensor::{CaptureResult, Sensor};
pub use state::SensorState;
