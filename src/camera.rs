//! Live camera session.
//!
//! A session is `Idle` or `Active`. The acquired stream lives in an
//! [`ActiveStream`] whose `Drop` releases the device, so stop, snapshot,
//! teardown and any early return or cancelled future all release it.

use crate::models::ImagePayload;
use async_trait::async_trait;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;
const JPEG_QUALITY: u8 = 92;

#[derive(Debug, Error)]
pub enum CameraError {
    /// The inner string is a diagnostic for logs; the display text is what users see.
    #[error("Could not access camera. Please check permissions.")]
    DeviceAccess(String),
    #[error("camera is not active")]
    NotActive,
    #[error("failed to read camera frame: {0}")]
    Frame(String),
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire exclusive access to the device.
    async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError>;
}

#[async_trait]
pub trait VideoStream: Send {
    async fn frame(&mut self) -> Result<DynamicImage, CameraError>;
    /// Stop all tracks. Called exactly once, when the owning session lets go.
    fn release(&mut self);
}

struct ActiveStream(Box<dyn VideoStream>);

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.release();
        info!("📷 Camera released");
    }
}

pub struct CameraSession {
    device: Arc<dyn CaptureDevice>,
    stream: Option<ActiveStream>,
}

impl CameraSession {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self { device, stream: None }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Acquire the device. A second call while active is a no-op.
    pub async fn start(&mut self) -> Result<(), CameraError> {
        if self.is_active() {
            debug!("Camera already active, ignoring start");
            return Ok(());
        }
        match self.device.open().await {
            Ok(stream) => {
                self.stream = Some(ActiveStream(stream));
                info!("📷 Camera started");
                Ok(())
            }
            Err(e) => {
                warn!(error = ?e, "❌ Error accessing the camera");
                Err(match e {
                    CameraError::DeviceAccess(d) => CameraError::DeviceAccess(d),
                    other => CameraError::DeviceAccess(other.to_string()),
                })
            }
        }
    }

    /// Snapshot the live feed as a 640x480 JPEG. The session ends either way.
    pub async fn capture_frame(&mut self) -> Result<ImagePayload, CameraError> {
        let mut stream = self.stream.take().ok_or(CameraError::NotActive)?;
        let frame = stream.0.frame().await?;
        drop(stream);
        encode_snapshot(&frame)
    }

    /// Release the device if held. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.stream.take().is_none() {
            debug!("Camera already stopped");
        }
    }
}

/// Draw `frame` onto a fixed 640x480 raster and encode it as JPEG.
pub fn encode_snapshot(frame: &DynamicImage) -> Result<ImagePayload, CameraError> {
    let raster = image::imageops::resize(&frame.to_rgb8(), FRAME_WIDTH, FRAME_HEIGHT, FilterType::Triangle);
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&raster)
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(ImagePayload::new(buf, "image/jpeg"))
}

// --- Devices ---

/// Stand-in used when no camera is configured; every open is refused.
pub struct UnavailableDevice;

#[async_trait]
impl CaptureDevice for UnavailableDevice {
    async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError> {
        Err(CameraError::DeviceAccess("no capture device configured".into()))
    }
}

/// A camera exposed as an HTTP endpoint returning one still image per GET
/// (IP cameras, mjpg-streamer `?action=snapshot`, go2rtc `frame.jpeg`).
pub struct HttpSnapshotDevice {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotDevice {
    pub fn new(url: impl Into<String>) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CameraError::DeviceAccess(e.to_string()))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl CaptureDevice for HttpSnapshotDevice {
    async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError> {
        let mut stream = HttpSnapshotStream { client: self.client.clone(), url: self.url.clone() };
        // Probe once so a dead or forbidden endpoint fails at start, not at capture
        stream.frame().await.map_err(|e| CameraError::DeviceAccess(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

struct HttpSnapshotStream {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl VideoStream for HttpSnapshotStream {
    async fn frame(&mut self) -> Result<DynamicImage, CameraError> {
        let response = self.client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CameraError::Frame(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::Frame(format!("snapshot endpoint returned {}", status)));
        }
        let data = response.bytes().await.map_err(|e| CameraError::Frame(e.to_string()))?;
        debug!(size = data.len(), "Snapshot fetched");
        image::load_from_memory(&data).map_err(|e| CameraError::Frame(e.to_string()))
    }

    fn release(&mut self) {
        debug!(url = %self.url, "Snapshot stream closed");
    }
}
