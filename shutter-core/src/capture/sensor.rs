//! The sensor capability consumed by the capture controller.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ShutterError;

/// One photograph as produced by the sensor.
///
/// Deliberately not `Clone`: each result is consumed exactly once by the
/// artifact pipeline.
#[derive(Debug)]
pub struct CaptureResult {
    /// Encoded image (JPEG) as returned by the hardware.
    pub raw_bytes: Bytes,
    pub width: u32,
    pub height: u32,
    /// Where the sensor stored the original, e.g. `file:///...`.
    pub source_uri: String,
    /// Identifies the capturing device to the controller.
    pub device_tag: String,
}

impl CaptureResult {
    pub fn size(&self) -> usize {
        self.raw_bytes.len()
    }
}

/// Camera hardware as seen by the agent.
#[async_trait]
pub trait Sensor: Send + Sync + 'static {
    /// Bring the hardware up. Resolves once the hardware signals ready.
    async fn initialize(&self) -> Result<(), ShutterError>;

    /// Take one photograph. Only called while the sensor is ready.
    async fn capture(&self) -> Result<CaptureResult, ShutterError>;

    /// Non-blocking readiness check used by the poll loop.
    fn is_ready(&self) -> bool;
}
