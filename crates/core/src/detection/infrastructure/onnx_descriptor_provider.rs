//! Face descriptor (identity embedding) provider.
//!
//! Runs an ArcFace/FaceNet-style recognition model on the face crop and
//! stores the L2-normalized embedding, so two faces can be compared with
//! [`FaceAttributes::descriptor_similarity`].
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::attribute_provider::{AttributeProvider, EnrichmentError};
use crate::detection::domain::detected_face::FaceAttributes;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

use super::math::l2_normalize;
use super::onnx_session;
use super::tensor::to_nchw;

const PROVIDER_NAME: &str = "descriptor";

const DEFAULT_INPUT_SIZE: Size = Size::new(112, 112);

pub struct OnnxDescriptorProvider {
    session: Mutex<ort::session::Session>,
    input_size: Size,
}

impl OnnxDescriptorProvider {
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

impl AttributeProvider for OnnxDescriptorProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn input_size(&self) -> Option<Size> {
        Some(self.input_size)
    }

    fn enrich(&self, face: &Frame) -> Result<FaceAttributes, EnrichmentError> {
        let tensor = to_nchw(face, self.input_size)
            .ok_or(EnrichmentError::EmptyCrop)?
            .mapv(centre_pixel);
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
        let embedding = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| Self::failure(e.to_string()))?;
        let raw: Vec<f32> = embedding.iter().copied().collect();

        let descriptor = normalized_descriptor(raw)
            .ok_or_else(|| Self::failure("embedding is empty or not finite"))?;
        Ok(FaceAttributes {
            descriptor: Some(descriptor),
            ..FaceAttributes::default()
        })
    }
}

/// Maps a `[0, 1]` pixel to `[-1, 1]`, i.e. `(p - 127.5) / 127.5`.
fn centre_pixel(v: f32) -> f32 {
    v * 2.0 - 1.0
}

fn normalized_descriptor(mut raw: Vec<f32>) -> Option<Vec<f32>> {
    if raw.is_empty() || raw.iter().any(|v| !v.is_finite()) || raw.iter().all(|v| *v == 0.0) {
        return None;
    }
    l2_normalize(&mut raw);
    Some(raw)
}
