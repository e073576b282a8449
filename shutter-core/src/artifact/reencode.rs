//! The re-encode capability consumed by the pipeline.

use crate::error::ShutterError;

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Output of one re-encode pass.
#[derive(Debug, Clone)]
pub struct Reencoded {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// JPEG re-encoder.
///
/// CPU-bound and synchronous; the pipeline runs it on the blocking pool.
pub trait Reencoder: Send + Sync + 'static {
    /// Re-encode `jpeg` at `quality` (1..=100), resizing to `resize`
    /// first when given.
    fn reencode(
        &self,
        jpeg: &[u8],
        quality: u8,
        resize: Option<Dimensions>,
    ) -> Result<Reencoded, ShutterError>;
}
