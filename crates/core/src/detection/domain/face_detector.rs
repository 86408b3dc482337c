use thiserror::Error;

use crate::detection::domain::detected_face::DetectedFace;
use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// The provider could not produce results for this frame but may for the
    /// next one (model warming up, transient inference failure).
    #[error("detection failed: {0}")]
    Recoverable(String),
    /// The provider cannot work at all (model missing or unusable).
    #[error("detection provider unusable: {0}")]
    Fatal(String),
}

impl DetectionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DetectionError::Fatal(_))
    }
}

/// Domain interface for face detection.
///
/// Providers are shared capabilities whose lifetime is independent of any
/// session, hence `&self` and `Sync`. Implementations needing mutable
/// inference state guard it internally.
pub trait FaceDetector: Send + Sync {
    /// Returns faces in the frame's own pixel space; an empty vector when
    /// there are none.
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectionError>;
}
