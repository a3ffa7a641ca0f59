//! Pipeline error kinds surfaced to callers and observers

use thiserror::Error;

use crate::capture::CaptureError;
use crate::vision::RecognitionError;

/// Errors from the capture-to-text pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// Camera access refused; terminal until access is granted externally
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// Camera stream dropped; recoverable by starting the camera again
    #[error("camera stream unavailable: {0}")]
    StreamUnavailable(String),

    /// Engine failure; recoverable by retrying the image or recapturing
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    /// A recognition is already in flight
    #[error("a page is still being processed")]
    Busy,

    /// Any other capture fault (missing device or grabber, undecodable frame)
    #[error("capture failed: {0}")]
    Capture(String),
}

impl ScanError {
    /// Whether retrying (possibly after restarting the camera) can succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScanError::PermissionDenied(_))
    }
}

impl From<CaptureError> for ScanError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => ScanError::PermissionDenied(msg),
            CaptureError::StreamUnavailable(msg) => ScanError::StreamUnavailable(msg),
            CaptureError::NotStarted => {
                ScanError::StreamUnavailable("camera not started".to_string())
            }
            other => ScanError::Capture(other.to_string()),
        }
    }
}

impl From<RecognitionError> for ScanError {
    fn from(err: RecognitionError) -> Self {
        match err {
            RecognitionError::Failed(cause) => ScanError::RecognitionFailed(cause.to_string()),
        }
    }
}
