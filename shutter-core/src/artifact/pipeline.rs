//! Size-bounded artifact preparation.
//!
//! The policy mirrors a bandwidth budget: payloads within budget are sent
//! untouched, larger ones get exactly one re-encode pass whose quality is
//! derived from how far over budget they are. There is no
//! converge-to-budget loop; a pass that still exceeds the budget is
//! accepted.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::artifact::reencode::{Dimensions, Reencoded, Reencoder};
use crate::artifact::storage::{Permission, Storage};
use crate::capture::sensor::CaptureResult;
use crate::error::{PersistenceWarning, ShutterError};
use crate::message::{ArtifactMessage, Command, encode_data_uri};

// ── ArtifactPolicy ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPolicy {
    /// Payloads up to this many bytes are sent as captured.
    pub budget_bytes: usize,
    /// Wider images are downscaled proportionally before re-encoding.
    pub max_width: u32,
    /// Lower bound of the re-encode quality.
    pub min_quality: u8,
    /// Upper bound of the re-encode quality.
    pub max_quality: u8,
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self {
            budget_bytes: 2 * 1024 * 1024,
            max_width: 4096,
            min_quality: 10,
            max_quality: 90,
        }
    }
}

/// What the pipeline will do with a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePlan {
    PassThrough,
    Reencode {
        quality: u8,
        resize: Option<Dimensions>,
    },
}

impl ArtifactPolicy {
    /// Decide how to treat a `size`-byte image of the given dimensions.
    pub fn plan(&self, size: usize, width: u32, height: u32) -> EncodePlan {
        if size <= self.budget_bytes {
            return EncodePlan::PassThrough;
        }

        // Over budget, so the ratio is below 1.0; the clamp keeps the
        // quality inside the valid range regardless.
        let ratio = self.budget_bytes as f64 / size as f64;
        let lo = self.min_quality.clamp(1, 100);
        let hi = self.max_quality.clamp(lo, 100);
        let quality = (ratio * 100.0).round().clamp(f64::from(lo), f64::from(hi)) as u8;

        let resize = (self.max_width > 0 && width > self.max_width).then(|| {
            let scaled = (u64::from(height) * u64::from(self.max_width) + u64::from(width) / 2)
                / u64::from(width);
            Dimensions {
                width: self.max_width,
                height: u32::try_from(scaled).unwrap_or(u32::MAX).max(1),
            }
        });

        EncodePlan::Reencode { quality, resize }
    }
}

// ── Artifact ─────────────────────────────────────────────────────

/// A transmission-ready photograph.
///
/// Only constructible by consuming a [`CaptureResult`].
#[derive(Debug)]
pub struct Artifact {
    payload: Bytes,
    width: u32,
    height: u32,
    source_uri: String,
    device_tag: String,
    reencoded: bool,
}

/// What is kept of a sent artifact for local display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub width: u32,
    pub height: u32,
    pub source_uri: String,
    pub payload_len: usize,
    pub reencoded: bool,
}

impl Artifact {
    fn passthrough(capture: CaptureResult) -> Self {
        Self {
            payload: capture.raw_bytes,
            width: capture.width,
            height: capture.height,
            source_uri: capture.source_uri,
            device_tag: capture.device_tag,
            reencoded: false,
        }
    }

    fn from_reencoded(capture: CaptureResult, out: Reencoded) -> Self {
        Self {
            payload: Bytes::from(out.bytes),
            width: out.width,
            height: out.height,
            source_uri: capture.source_uri,
            device_tag: capture.device_tag,
            reencoded: true,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    pub fn device_tag(&self) -> &str {
        &self.device_tag
    }

    pub fn is_reencoded(&self) -> bool {
        self.reencoded
    }

    /// The `RECEIVE_PHOTO` body for this artifact.
    pub fn to_message(&self) -> ArtifactMessage {
        ArtifactMessage {
            width: self.width,
            height: self.height,
            image: encode_data_uri(&self.payload),
            result_uri: self.source_uri.clone(),
            ip: self.device_tag.clone(),
        }
    }

    /// The complete outbound frame.
    pub fn encode_frame(&self) -> Result<String, ShutterError> {
        Command::ReceiveArtifact(self.to_message()).encode()
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            width: self.width,
            height: self.height,
            source_uri: self.source_uri.clone(),
            payload_len: self.payload.len(),
            reencoded: self.reencoded,
        }
    }
}

// ── ArtifactPipeline ─────────────────────────────────────────────

pub struct ArtifactPipeline {
    policy: ArtifactPolicy,
    reencoder: Arc<dyn Reencoder>,
    storage: Option<Arc<dyn Storage>>,
}

impl ArtifactPipeline {
    pub fn new(policy: ArtifactPolicy, reencoder: Arc<dyn Reencoder>) -> Self {
        Self {
            policy,
            reencoder,
            storage: None,
        }
    }

    /// Also keep a local copy of every artifact.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn policy(&self) -> &ArtifactPolicy {
        &self.policy
    }

    pub fn plan(&self, capture: &CaptureResult) -> EncodePlan {
        self.policy.plan(capture.size(), capture.width, capture.height)
    }

    /// Turn one capture into an artifact.
    ///
    /// Never fails: if the re-encode pass errors, the original bytes are
    /// sent instead.
    pub async fn process(&self, capture: CaptureResult) -> Artifact {
        let size = capture.size();
        match self.plan(&capture) {
            EncodePlan::PassThrough => {
                debug!(bytes = size, budget = self.policy.budget_bytes, "within budget");
                Artifact::passthrough(capture)
            }
            EncodePlan::Reencode { quality, resize } => {
                let reencoder = Arc::clone(&self.reencoder);
                let bytes = capture.raw_bytes.clone();
                let job =
                    tokio::task::spawn_blocking(move || reencoder.reencode(&bytes, quality, resize));

                match job.await {
                    Ok(Ok(out)) => {
                        info!(
                            from = size,
                            to = out.bytes.len(),
                            quality,
                            width = out.width,
                            height = out.height,
                            "re-encoded artifact"
                        );
                        if out.bytes.len() > self.policy.budget_bytes {
                            debug!(budget = self.policy.budget_bytes, "still over budget after one pass");
                        }
                        Artifact::from_reencoded(capture, out)
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "re-encode failed; sending original bytes");
                        Artifact::passthrough(capture)
                    }
                    Err(e) => {
                        warn!(error = %e, "re-encode task aborted; sending original bytes");
                        Artifact::passthrough(capture)
                    }
                }
            }
        }
    }

    /// Save a local copy, if storage is configured.
    ///
    /// Failures are warnings: they never affect transmission.
    pub async fn persist(&self, artifact: &Artifact) -> Result<Option<PathBuf>, PersistenceWarning> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };

        if storage.permission() != Permission::Granted
            && storage.request_permission().await != Permission::Granted
        {
            return Err(PersistenceWarning::PermissionDenied);
        }

        storage
            .persist(artifact)
            .await
            .map(Some)
            .map_err(PersistenceWarning::Failed)
    }
}

// ── Tests ────────────────────────────────────────────────────────
