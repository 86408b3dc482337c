use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::attribute_provider::{AttributeProvider, EnrichmentError};
use crate::detection::domain::detected_face::{AgeGender, FaceAttributes};
use crate::shared::constants::{GENDER_LABELS, UNKNOWN_GENDER};
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

use super::onnx_session;
use super::tensor::to_nchw;

const PROVIDER_NAME: &str = "age-gender";

/// Used when the model declares a dynamic input shape.
const DEFAULT_INPUT_SIZE: Size = Size::new(64, 64);

/// Age/gender regression model run on a single face crop.
///
/// The model yields an age estimate and a gender score, either as one
/// `[1, 2]` tensor or as two separate outputs. The gender score is rounded
/// to index [`GENDER_LABELS`].
pub struct OnnxAgeGenderProvider {
    session: Mutex<ort::session::Session>,
    input_size: Size,
}

impl OnnxAgeGenderProvider {
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

impl AttributeProvider for OnnxAgeGenderProvider {
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

        let mut values = Vec::with_capacity(2);
        for i in 0..outputs.len().min(2) {
            let array = outputs[i]
                .try_extract_array::<f32>()
                .map_err(|e| Self::failure(e.to_string()))?;
            values.extend(array.iter().copied());
        }

        let age_gender = parse_prediction(&values)
            .ok_or_else(|| Self::failure(format!("expected 2 values, got {}", values.len())))?;
        Ok(FaceAttributes {
            age_gender: Some(age_gender),
            expressions: None,
            descriptor: None,
        })
    }
}

/// Maps `[age, gender_score, ..]` to an [`AgeGender`].
fn parse_prediction(values: &[f32]) -> Option<AgeGender> {
    let (&age, &gender_score) = (values.first()?, values.get(1)?);
    if !age.is_finite() {
        return None;
    }
    let gender = if gender_score.is_finite() && gender_score >= 0.0 {
        GENDER_LABELS
            .get(gender_score.round() as usize)
            .copied()
            .unwrap_or(UNKNOWN_GENDER)
    } else {
        UNKNOWN_GENDER
    };
    Some(AgeGender {
        age: age.max(0.0),
        gender: gender.to_string(),
    })
}
