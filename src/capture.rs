//! Capture widget: camera access, live preview state and still capture.
//!
//! The widget owns the camera stream for its whole lifetime. The stream is
//! released exactly once, whichever way the widget is left: capture, cancel
//! or plain drop.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::activity_log;
use crate::config::Config;
use crate::encoded_image::EncodedImage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Camera is not supported: {0}")]
    Unsupported(String),
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("Camera is not ready")]
    NotReady,
    #[error("Failed to read camera frame: {0}")]
    Frame(String),
    #[error("Failed to encode captured frame: {0}")]
    Encode(String),
}

/// Source of camera streams. Opening a stream is what triggers the
/// platform permission prompt.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError>;
}

/// A live camera stream
pub trait CameraStream: Send {
    /// The frame currently shown in the preview
    fn current_frame(&mut self) -> Result<RgbaImage, CaptureError>;

    /// Stop the stream and free the device
    fn release(&mut self);
}

/// Observable widget state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    /// Permission not resolved yet
    Pending,
    /// Access refused or unsupported
    Denied(CaptureError),
    /// Live preview running
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub jpeg_quality: u8,
    /// Flip horizontally so the still matches the mirrored preview
    pub mirror: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 85,
            mirror: true,
        }
    }
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
            mirror: config.mirror_capture,
        }
    }
}

pub struct CaptureWidget {
    state: CaptureState,
    stream: Option<Box<dyn CameraStream>>,
    access_requested: bool,
    settings: CaptureSettings,
}

impl CaptureWidget {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            state: CaptureState::Pending,
            stream: None,
            access_requested: false,
            settings,
        }
    }

    /// Create the widget and request camera access once
    pub async fn mount(device: &dyn CameraDevice, settings: CaptureSettings) -> Self {
        let mut widget = Self::new(settings);
        widget.request_access(device).await;
        widget
    }

    /// Resolve the pending permission. Repeat calls are no-ops.
    pub async fn request_access(&mut self, device: &dyn CameraDevice) {
        if self.access_requested {
            debug!("Camera access already requested for this mount");
            return;
        }
        self.access_requested = true;

        match device.open().await {
            Ok(stream) => {
                activity_log::log_camera_event("acquired", None);
                self.stream = Some(stream);
                self.state = CaptureState::Ready;
            }
            Err(e) => {
                warn!("Camera unavailable: {}", e);
                activity_log::log_camera_event("denied", Some(&e.to_string()));
                self.state = CaptureState::Denied(e);
            }
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == CaptureState::Ready
    }

    /// Freeze the current frame, mirror it and encode it as a JPEG data URI.
    /// Consumes the widget; the camera is released on return.
    pub fn capture(mut self) -> Result<EncodedImage, CaptureError> {
        if self.state != CaptureState::Ready {
            return Err(CaptureError::NotReady);
        }
        let stream = self.stream.as_mut().ok_or(CaptureError::NotReady)?;

        let frame = stream.current_frame()?;
        let image = encode_still(frame, self.settings)?;

        info!(
            "Captured still {} bytes (mirrored={})",
            image.byte_len(),
            self.settings.mirror
        );
        activity_log::log_camera_event("captured", None);
        Ok(image)
    }

    /// Abort without yielding an image
    pub fn cancel(self) {
        activity_log::log_camera_event("cancelled", None);
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            activity_log::log_camera_event("released", None);
        }
    }
}

impl Drop for CaptureWidget {
    fn drop(&mut self) {
        self.release();
    }
}

/// Mirror (optionally) and JPEG-encode one frame
pub fn encode_still(frame: RgbaImage, settings: CaptureSettings) -> Result<EncodedImage, CaptureError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CaptureError::Frame("Frame is empty".to_string()));
    }

    let frame = if settings.mirror {
        image::imageops::flip_horizontal(&frame)
    } else {
        frame
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgba8(frame).to_rgb8();

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, settings.jpeg_quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(EncodedImage::from_jpeg_bytes(&bytes))
}

/// Camera substitute that serves a still image file as its live frame.
///
/// Used by the CLI, where the surrounding application supplies a photo taken
/// elsewhere instead of a hardware stream.
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    path: PathBuf,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CameraDevice for StillImageCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError> {
        let bytes = std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(format!("{:?}: {}", self.path, e))
            }
            _ => CaptureError::Unsupported(format!("{:?}: {}", self.path, e)),
        })?;

        let frame = image::load_from_memory(&bytes)
            .map_err(|e| CaptureError::Unsupported(format!("Unreadable image {:?}: {}", self.path, e)))?
            .to_rgba8();

        debug!(
            "Still image camera opened {:?} ({}x{})",
            self.path,
            frame.width(),
            frame.height()
        );

        Ok(Box::new(StillImageStream { frame: Some(frame) }))
    }
}

struct StillImageStream {
    frame: Option<RgbaImage>,
}

impl CameraStream for StillImageStream {
    fn current_frame(&mut self) -> Result<RgbaImage, CaptureError> {
        self.frame
            .clone()
            .ok_or_else(|| CaptureError::Frame("Stream already released".to_string()))
    }

    fn release(&mut self) {
        self.frame = None;
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Camera that serves a fixed frame and counts opens and releases
    #[derive(Clone)]
    pub(crate) struct FakeCamera {
        frame: RgbaImage,
        deny: Option<CaptureError>,
        pub(crate) opens: Arc<AtomicUsize>,
        pub(crate) releases: Arc<AtomicUsize>,
    }

    impl FakeCamera {
        pub(crate) fn new(frame: RgbaImage) -> Self {
            Self {
                frame,
                deny: None,
                opens: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn denied() -> Self {
            let mut camera = Self::new(RgbaImage::new(1, 1));
            camera.deny = Some(CaptureError::PermissionDenied("user refused".to_string()));
            camera
        }

        pub(crate) fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub(crate) fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CameraDevice for FakeCamera {
        async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = &self.deny {
                return Err(e.clone());
            }
            Ok(Box::new(FakeStream {
                frame: self.frame.clone(),
                releases: self.releases.clone(),
            }))
        }
    }

    struct FakeStream {
        frame: RgbaImage,
        releases: Arc<AtomicUsize>,
    }

    impl CameraStream for FakeStream {
        fn current_frame(&mut self) -> Result<RgbaImage, CaptureError> {
            Ok(self.frame.clone())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 32x16 frame: left half red, right half blue
    pub(crate) fn split_frame() -> RgbaImage {
        RgbaImage::from_fn(32, 16, |x, _| {
            if x < 16 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 255, 255])
            }
        })
    }
}
