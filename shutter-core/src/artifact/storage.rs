//! Durable local copies of transmitted artifacts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::artifact::pipeline::Artifact;
use crate::error::ShutterError;

/// State of the storage permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Granted,
    Denied,
    /// Not asked yet.
    Undetermined,
}

/// Somewhere to keep a copy of each artifact.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    fn permission(&self) -> Permission;

    /// Ask for the permission; returns the resulting state.
    async fn request_permission(&self) -> Permission;

    /// Save one artifact; returns where it was written.
    async fn persist(&self, artifact: &Artifact) -> Result<PathBuf, ShutterError>;
}

// ── DirectoryStorage ─────────────────────────────────────────────

/// Writes each payload to `<dir>/<content-hash>.jpg`.
///
/// Content addressing makes re-saving the same photo a no-op overwrite.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    dir: PathBuf,
    granted: bool,
}

impl DirectoryStorage {
    /// `granted` stands in for the platform permission prompt.
    pub fn new(dir: impl Into<PathBuf>, granted: bool) -> Self {
        Self {
            dir: dir.into(),
            granted,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used for `payload`.
    pub fn file_name(payload: &[u8]) -> String {
        let hash = blake3::hash(payload);
        format!("{}.jpg", &hash.to_hex()[..16])
    }
}

#[async_trait]
impl Storage for DirectoryStorage {
    fn permission(&self) -> Permission {
        if self.granted {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    async fn request_permission(&self) -> Permission {
        self.permission()
    }

    async fn persist(&self, artifact: &Artifact) -> Result<PathBuf, ShutterError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(artifact.payload()));
        tokio::fs::write(&path, artifact.payload()).await?;
        debug!(path = %path.display(), bytes = artifact.payload().len(), "artifact persisted");
        Ok(path)
    }
}
