//! Camera Capture Layer
//!
//! Produces still frames from a live camera (or a replayed set of image files).
//! No recognition happens here; frames are handed to the vision layer as encoded
//! image buffers.

pub mod camera;
pub mod frame;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

pub use camera::{list_devices, CameraSource};
pub use frame::{CapturedFrame, ImageData};

/// Errors raised while acquiring or sampling a capture source
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Access to the device was refused; terminal until granted externally
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// The stream ended or was revoked; call `start()` again
    #[error("camera stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("no capture device found: {0}")]
    DeviceNotFound(String),

    #[error("capture backend not available: {0}")]
    BackendUnavailable(String),

    #[error("capture source not started")]
    NotStarted,

    #[error("image decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Map an IO error from opening a device or file onto the capture error kinds
    pub fn from_open_error(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(path.display().to_string())
            }
            std::io::ErrorKind::NotFound => CaptureError::DeviceNotFound(path.display().to_string()),
            _ => CaptureError::Io(err),
        }
    }
}

/// Which way the camera should face when no device is configured explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Rear ("environment") camera, pointed at the page
    #[default]
    Rear,
    /// Front ("user") camera
    Front,
}

impl FacingMode {
    /// Substrings in a device name that indicate this facing
    pub fn name_hints(&self) -> &'static [&'static str] {
        match self {
            FacingMode::Rear => &["rear", "back", "world", "environment"],
            FacingMode::Front => &["front", "user", "integrated", "facetime"],
        }
    }
}

/// Camera capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Explicit video device (e.g. /dev/video0); auto-selected when unset
    pub device: Option<PathBuf>,
    /// Preferred facing used for auto-selection
    pub facing: FacingMode,
    /// Frame grabber executable
    pub ffmpeg_path: PathBuf,
    /// How long `capture()` waits for the first frame after `start()`
    pub first_frame_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            facing: FacingMode::Rear,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            first_frame_timeout_ms: 5000,
        }
    }
}

/// A source of still frames with an explicit acquire/release lifecycle
pub trait CaptureSource: Send {
    /// Acquire the underlying device or stream
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Sample the current frame as an encoded image
    fn capture(&mut self) -> Result<CapturedFrame, CaptureError>;

    /// Release the device; calling it when already stopped is a no-op
    fn stop(&mut self);

    /// Whether the source currently holds its device
    fn is_active(&self) -> bool;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Replays a fixed list of image files as if they were camera frames
pub struct ImageFileSource {
    paths: Vec<PathBuf>,
    next: usize,
    active: bool,
}

impl ImageFileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            next: 0,
            active: false,
        }
    }

    /// Number of files not yet captured
    pub fn remaining(&self) -> usize {
        self.paths.len().saturating_sub(self.next)
    }
}

impl CaptureSource for ImageFileSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        // Surface unreadable files up front, the same way a refused camera would
        for path in &self.paths[self.next..] {
            std::fs::File::open(path).map_err(|e| CaptureError::from_open_error(path, e))?;
        }
        self.active = true;
        info!("Image file source started with {} file(s)", self.remaining());
        Ok(())
    }

    fn capture(&mut self) -> Result<CapturedFrame, CaptureError> {
        if !self.active {
            return Err(CaptureError::NotStarted);
        }

        let Some(path) = self.paths.get(self.next).cloned() else {
            self.active = false;
            return Err(CaptureError::StreamUnavailable(
                "no more image files to replay".to_string(),
            ));
        };
        self.next += 1;

        let bytes = std::fs::read(&path).map_err(|e| CaptureError::from_open_error(&path, e))?;
        let frame = CapturedFrame::from_encoded(bytes)?;
        let (width, height) = frame.dimensions();
        debug!("Captured {} ({}x{})", path.display(), width, height);
        Ok(frame)
    }

    fn stop(&mut self) {
        if self.active {
            debug!("Image file source stopped");
        }
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn describe(&self) -> String {
        format!("{} image file(s)", self.paths.len())
    }
}
