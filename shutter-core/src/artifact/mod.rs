//! Outbound artifact pipeline.
//!
//! ```text
//! CaptureResult ──► plan (budget check) ──► [Reencoder, once] ──► Artifact ──► RECEIVE_PHOTO
//!                                                                     │
//!                                                                     └──► Storage (optional copy)
//! ```

pub mod pipeline;
pub mod reencode;
pub mod storage;

pub use pipeline::{Artifact, ArtifactPipeline, ArtifactPolicy, ArtifactSummary, EncodePlan};
pub use reencode::{Dimensions, Reencoded, Reencoder};
pub use storage::{DirectoryStorage, Permission, Storage};
