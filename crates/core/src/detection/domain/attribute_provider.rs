use thiserror::Error;

use crate::detection::domain::detected_face::FaceAttributes;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrichmentError {
    #[error("face region is empty after clamping to the frame")]
    EmptyCrop,
    #[error("{provider} failed: {message}")]
    Provider { provider: String, message: String },
    #[error("enrichment worker panicked")]
    Panicked,
}

/// Domain interface for secondary face attributes (age, gender, expression).
///
/// Called concurrently for the faces of one cycle, hence `Sync`.
pub trait AttributeProvider: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Input geometry the provider expects; crops are resized to it before
    /// [`AttributeProvider::enrich`] is called. `None` accepts any size.
    fn input_size(&self) -> Option<Size>;

    /// Returns only the attribute fields this provider knows about.
    fn enrich(&self, face: &Frame) -> Result<FaceAttributes, EnrichmentError>;
}
