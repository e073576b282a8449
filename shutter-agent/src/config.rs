//! Configuration for the capture agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shutter_core::{
    ArtifactPolicy, Endpoint, OrchestratorConfig, ReadinessPolicy, SessionOptions, ShutterError,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Controller connection.
    pub network: NetworkConfig,
    /// Image source standing in for the camera.
    pub sensor: SensorConfig,
    /// Readiness wait timing.
    pub capture: CaptureConfig,
    /// Outbound size budget.
    pub artifact: ArtifactConfig,
    /// Local copies of sent photos.
    pub storage: StorageConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Controller websocket address; `ws://` is assumed without a scheme.
    pub endpoint: String,
    /// Connect plus handshake deadline in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound frames buffered per session.
    pub outbound_capacity: usize,
    /// Delay before rebuilding a dropped session. 0 disables reconnects.
    pub reconnect_delay_ms: u64,
}

/// Sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Still image returned by every capture.
    pub source: PathBuf,
    /// Simulated bring-up time in milliseconds.
    pub warmup_ms: u64,
    /// Reported as the artifact's `ip`. Empty = local address used to
    /// reach the controller.
    pub device_tag: String,
}

/// Capture readiness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub poll_interval_ms: u64,
    /// Unset: 5000, or 10000 when storage is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_ceiling_ms: Option<u64>,
    /// 0 disables countdown events.
    pub countdown_from: u32,
    pub scanner_visible_at: u32,
}

/// Artifact size budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub budget_bytes: usize,
    pub max_width: u32,
    pub min_quality: u8,
    pub max_quality: u8,
}

/// Local persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Answer to the storage permission request.
    pub permission_granted: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080".into(),
            connect_timeout_ms: 10_000,
            outbound_capacity: 100,
            reconnect_delay_ms: 0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("still.jpg"),
            warmup_ms: 1500,
            device_tag: String::new(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let policy = ReadinessPolicy::default();
        Self {
            poll_interval_ms: millis(policy.poll_interval),
            readiness_ceiling_ms: None,
            countdown_from: policy.countdown_from,
            scanner_visible_at: policy.scanner_visible_at,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        let policy = ArtifactPolicy::default();
        Self {
            budget_bytes: policy.budget_bytes,
            max_width: policy.max_width,
            min_quality: policy.min_quality,
            max_quality: policy.max_quality,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("captures"),
            permission_granted: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Loading ──────────────────────────────────────────────────────

/// Why a config file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config at {0}")]
    Missing(PathBuf),

    #[error("invalid config {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// Nothing is logged here: callers usually fall back to defaults and
    /// report the error once logging is up.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|_| ConfigError::Missing(path.to_path_buf()))?;
        toml::from_str(&contents).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn endpoint(&self) -> Result<Endpoint, ShutterError> {
        Endpoint::parse(&self.network.endpoint)
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        let base = ReadinessPolicy {
            poll_interval: Duration::from_millis(self.capture.poll_interval_ms.max(1)),
            countdown_from: self.capture.countdown_from,
            scanner_visible_at: self.capture.scanner_visible_at,
            ..ReadinessPolicy::default()
        };
        match self.capture.readiness_ceiling_ms {
            Some(ms) => ReadinessPolicy {
                ceiling: Duration::from_millis(ms),
                ..base
            },
            None if self.storage.enabled => base.persisting(),
            None => base,
        }
    }

    pub fn artifact_policy(&self) -> ArtifactPolicy {
        ArtifactPolicy {
            budget_bytes: self.artifact.budget_bytes,
            max_width: self.artifact.max_width,
            min_quality: self.artifact.min_quality.clamp(1, 100),
            max_quality: self.artifact.max_quality.clamp(1, 100),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms.max(1)),
            outbound_capacity: self.network.outbound_capacity.max(1),
        }
    }

    /// Convert network settings into an `OrchestratorConfig`.
    pub fn to_orchestrator_config(&self) -> Result<OrchestratorConfig, ShutterError> {
        Ok(OrchestratorConfig {
            endpoint: self.endpoint()?,
            session: self.session_options(),
            reconnect_delay: (self.network.reconnect_delay_ms > 0)
                .then(|| Duration::from_millis(self.network.reconnect_delay_ms)),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
