use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::attribute_provider::{AttributeProvider, EnrichmentError};
use crate::detection::domain::detected_face::{Expressions, FaceAttributes};
use crate::shared::constants::EXPRESSION_LABELS;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

use super::math::softmax;
use super::onnx_session;
use super::tensor::to_nchw;

const PROVIDER_NAME: &str = "expression";

const DEFAULT_INPUT_SIZE: Size = Size::new(112, 112);

/// Seven-class face expression classifier.
///
/// Logits are softmaxed and paired with [`EXPRESSION_LABELS`] in output order.
pub struct OnnxExpressionProvider {
    session: Mutex<ort::session::Session>,
    input_size: Size,
}

impl OnnxExpressionProvider {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let session = onnx_session::load_session(model_path)?;
        let input_size = onnx_session::nchw_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
        Ok(Self {
            session: Mutex::new(session),
            input_size,
        })
    }

    fn failure(message: impl Into<String>) -> EnrichmentError {
        EnrichmentError::Provider {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }
}

impl AttributeProvider for OnnxExpressionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn input_size(&self) -> Option<Size> {
        Some(self.input_size)
    }

    fn enrich(&self, face: &Frame) -> Result<FaceAttributes, EnrichmentError> {
        let tensor = to_nchw(face, self.input_size).ok_or(EnrichmentError::EmptyCrop)?;
        let input_value =
            ort::value::Tensor::from_array(tensor).map_err(|e| Self::failure(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| Self::failure("session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| Self::failure(e.to_string()))?;
        if outputs.len() == 0 {
            return Err(Self::failure("model produced no outputs"));
        }
        let logits = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| Self::failure(e.to_string()))?;
        let logits: Vec<f32> = logits.iter().copied().collect();

        let expressions = label_scores(&logits).ok_or_else(|| {
            Self::failure(format!(
                "expected {} logits, got {}",
                EXPRESSION_LABELS.len(),
                logits.len()
            ))
        })?;
        Ok(FaceAttributes {
            age_gender: None,
            expressions: Some(expressions),
            descriptor: None,
        })
    }
}

fn label_scores(logits: &[f32]) -> Option<Expressions> {
    if logits.len() != EXPRESSION_LABELS.len() {
        return None;
    }
    Some(
        EXPRESSION_LABELS
            .iter()
            .zip(softmax(logits))
            .map(|(label, p)| (label.to_string(), p))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_scores_pick_highest_logit() {
        let logits = [0.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let e = label_scores(&logits).unwrap();
        assert_eq!(e.len(), 7);
        assert_eq!(e.dominant().unwrap().0, "happy");
    }

    #[test]
    fn test_label_scores_are_probabilities() {
        let logits = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let e = label_scores(&logits).unwrap();
        let total: f32 = EXPRESSION_LABELS.iter().filter_map(|l| e.get(l)).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_label_scores_wrong_length() {
        assert!(label_scores(&[1.0, 2.0]).is_none());
    }
}
