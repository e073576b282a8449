//! File-backed sensor: serves a still image from disk as every photo.

use std::io::Cursor;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use image::ImageFormat;
use shutter_core::{CaptureResult, Endpoint, Reencoder, Sensor, ShutterError};

use crate::reencode::JpegReencoder;

/// Quality used when a non-JPEG still has to be converted.
const CONVERT_QUALITY: u8 = 95;

pub struct FileSensor {
    source: PathBuf,
    warmup: Duration,
    device_tag: String,
    ready: AtomicBool,
}

impl FileSensor {
    pub fn new(source: impl Into<PathBuf>, warmup: Duration, device_tag: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            warmup,
            device_tag: device_tag.into(),
            ready: AtomicBool::new(false),
        }
    }

    fn source_uri(&self) -> String {
        let path = std::fs::canonicalize(&self.source).unwrap_or_else(|_| self.source.clone());
        format!("file://{}", path.display())
    }
}

#[async_trait]
impl Sensor for FileSensor {
    async fn initialize(&self) -> Result<(), ShutterError> {
        tokio::time::sleep(self.warmup).await;
        let meta = tokio::fs::metadata(&self.source).await.map_err(|e| {
            ShutterError::Sensor(format!("source {}: {e}", self.source.display()))
        })?;
        if !meta.is_file() {
            return Err(ShutterError::Sensor(format!(
                "source {} is not a file",
                self.source.display()
            )));
        }
        self.ready.store(true, Ordering::Release);
        info!(source = %self.source.display(), "sensor up");
        Ok(())
    }

    async fn capture(&self) -> Result<CaptureResult, ShutterError> {
        let raw = tokio::fs::read(&self.source).await?;
        let (raw, width, height) = match image::guess_format(&raw).ok() {
            Some(ImageFormat::Jpeg) => {
                let reader = image::ImageReader::with_format(Cursor::new(&raw), ImageFormat::Jpeg);
                let (width, height) = reader
                    .into_dimensions()
                    .map_err(|e| ShutterError::Sensor(e.to_string()))?;
                (raw, width, height)
            }
            Some(format) => {
                // Photos leave as JPEG whatever the source format.
                debug!(?format, "converting still to JPEG");
                let converted = tokio::task::spawn_blocking(move || {
                    JpegReencoder.reencode(&raw, CONVERT_QUALITY, None)
                })
                .await
                .map_err(|e| ShutterError::Other(e.to_string()))?
                .map_err(|e| ShutterError::Sensor(e.to_string()))?;
                (converted.bytes, converted.width, converted.height)
            }
            None => {
                return Err(ShutterError::Sensor(format!(
                    "source {} is not an image",
                    self.source.display()
                )));
            }
        };
        debug!(width, height, bytes = raw.len(), "still captured");

        Ok(CaptureResult {
            raw_bytes: Bytes::from(raw),
            width,
            height,
            source_uri: self.source_uri(),
            device_tag: self.device_tag.clone(),
        })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Local address the OS would use to reach `endpoint`.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub async fn local_ip_toward(endpoint: &Endpoint) -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(endpoint.socket_authority()).await.ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
