use crate::camera::{CameraError, CameraSession};
use crate::models::ImagePayload;
use crate::state::{dispatch, Event, SessionState};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

const FALLBACK_MIME: &str = "image/jpeg";

/// Chooses the MIME type for an uploaded file without validating content.
pub fn resolve_mime(declared: Option<&str>, bytes: &[u8]) -> String {
    declared
        .map(str::trim)
        .filter(|m| !m.is_empty() && *m != "application/octet-stream")
        .map(String::from)
        .or_else(|| image::guess_format(bytes).ok().map(|f| f.to_mime_type().to_string()))
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// Owns the two image sources. Either one replaces the current image and
/// resets the request state before anything else can observe it.
pub struct ImageAcquisitionController {
    camera: tokio::sync::Mutex<CameraSession>,
    /// Mirrors the session so status reads never wait on device I/O.
    camera_active: AtomicBool,
    state: Arc<Mutex<SessionState>>,
}

impl ImageAcquisitionController {
    pub fn new(camera: CameraSession, state: Arc<Mutex<SessionState>>) -> Self {
        let active = camera.is_active();
        Self { camera: tokio::sync::Mutex::new(camera), camera_active: AtomicBool::new(active), state }
    }

    /// Upload path. Any live camera preview is abandoned.
    pub async fn set_from_file(&self, bytes: Bytes, declared_mime: Option<&str>) -> SessionState {
        self.stop_camera().await;
        let mime_type = resolve_mime(declared_mime, &bytes);
        let payload = ImagePayload::new(bytes, mime_type);
        info!(size = payload.bytes.len(), mime = %payload.mime_type, "🖼️ Image selected from file");
        dispatch(&self.state, Event::ImageSelected(payload))
    }

    pub fn set_from_camera_frame(&self, frame: ImagePayload) -> SessionState {
        info!(size = frame.bytes.len(), "🖼️ Image selected from camera");
        dispatch(&self.state, Event::ImageSelected(frame))
    }

    pub async fn start_camera(&self) -> Result<(), CameraError> {
        let mut camera = self.camera.lock().await;
        let result = camera.start().await;
        self.camera_active.store(camera.is_active(), Ordering::SeqCst);
        drop(camera);
        if let Err(e) = &result {
            dispatch(&self.state, Event::CameraFailed { message: e.to_string() });
        }
        result
    }

    pub async fn stop_camera(&self) {
        let mut camera = self.camera.lock().await;
        camera.stop();
        self.camera_active.store(false, Ordering::SeqCst);
    }

    /// Snapshot the preview and make it the current image.
    pub async fn capture(&self) -> Result<SessionState, CameraError> {
        let frame = {
            let mut camera = self.camera.lock().await;
            // A capture always ends the session, even if this future is dropped
            self.camera_active.store(false, Ordering::SeqCst);
            camera.capture_frame().await
        };
        match frame {
            Ok(payload) => Ok(self.set_from_camera_frame(payload)),
            Err(e) => {
                if !matches!(e, CameraError::NotActive) {
                    dispatch(&self.state, Event::CameraFailed { message: e.to_string() });
                }
                Err(e)
            }
        }
    }

    pub fn camera_active(&self) -> bool {
        self.camera_active.load(Ordering::SeqCst)
    }

    /// Teardown hook; releases the device if still held.
    pub async fn shutdown(&self) {
        info!("Shutting down image acquisition");
        self.stop_camera().await;
    }
}
