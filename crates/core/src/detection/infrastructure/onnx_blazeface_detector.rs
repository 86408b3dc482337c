/// BlazeFace face detector using ONNX Runtime via `ort`.
///
/// A lightweight short-range detector producing boxes and six keypoints
/// (eyes, nose tip, mouth, ear tragions) per face, fast enough to run on
/// every frame of a live feed.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::detected_face::DetectedFace;
use crate::detection::domain::face_detector::{DetectionError, FaceDetector};
use crate::shared::frame::Frame;
use crate::shared::geometry::{Size, SourcePoint, SourceRect};

use super::math::{nms, sigmoid};
use super::onnx_session;
use super::tensor::to_nchw;

/// BlazeFace model input resolution.
const INPUT_SIZE: u32 = 128;

/// Default confidence threshold.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.3;

/// Number of BlazeFace anchors (short-range model).
const NUM_ANCHORS: usize = 896;

/// Values per anchor in the regressor output: 4 box + 6 keypoints * 2.
const REGRESSOR_STRIDE: usize = 16;

const NUM_KEYPOINTS: usize = 6;

/// BlazeFace face detector backed by an ONNX Runtime session.
///
/// The session is locked for the duration of one inference, so a detector
/// can be shared between sessions.
pub struct OnnxBlazefaceDetector {
    session: Mutex<ort::session::Session>,
    confidence: f64,
    anchors: Vec<[f32; 2]>,
}

impl OnnxBlazefaceDetector {
    /// Load a BlazeFace ONNX model.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = onnx_session::load_session(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
            confidence,
            anchors: generate_anchors(),
        })
    }
}

impl FaceDetector for OnnxBlazefaceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectionError> {
        let input_tensor = to_nchw(frame, Size::new(INPUT_SIZE, INPUT_SIZE))
            .ok_or_else(|| DetectionError::Recoverable("frame has no pixels".into()))?;
        let input_value = ort::value::Tensor::from_array(input_tensor)
            .map_err(|e| DetectionError::Recoverable(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Fatal("BlazeFace session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| DetectionError::Recoverable(e.to_string()))?;

        // BlazeFace outputs two tensors:
        // - regressors: [1, 896, 16] (box deltas + keypoints)
        // - classificators: [1, 896, 1] (confidence scores)
        if outputs.len() < 2 {
            return Err(DetectionError::Fatal(format!(
                "BlazeFace model expected 2 outputs, got {}",
                outputs.len()
            )));
        }

        let regressors = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectionError::Fatal(e.to_string()))?;
        let scores = outputs[1]
            .try_extract_array::<f32>()
            .map_err(|e| DetectionError::Fatal(e.to_string()))?;
        let reg_data = regressors
            .as_slice()
            .ok_or_else(|| DetectionError::Recoverable("Cannot get regressor slice".into()))?;
        let score_data = scores
            .as_slice()
            .ok_or_else(|| DetectionError::Recoverable("Cannot get score slice".into()))?;

        decode(
            reg_data,
            score_data,
            &self.anchors,
            self.confidence,
            frame.size(),
        )
    }
}

/// A model whose outputs do not match the short-range layout cannot be
/// decoded on any frame, so a mismatch is fatal.
fn check_output_shapes(reg_len: usize, score_len: usize) -> Result<(), DetectionError> {
    if reg_len != NUM_ANCHORS * REGRESSOR_STRIDE {
        return Err(DetectionError::Fatal(format!(
            "BlazeFace regressors: expected {} values ({NUM_ANCHORS}x{REGRESSOR_STRIDE}), got {reg_len}",
            NUM_ANCHORS * REGRESSOR_STRIDE
        )));
    }
    if score_len != NUM_ANCHORS {
        return Err(DetectionError::Fatal(format!(
            "BlazeFace scores: expected {NUM_ANCHORS} values, got {score_len}"
        )));
    }
    Ok(())
}

/// Decodes raw model outputs into source-space faces, applying the confidence
/// threshold and NMS.
fn decode(
    reg_data: &[f32],
    score_data: &[f32],
    anchors: &[[f32; 2]],
    confidence: f64,
    frame: Size,
) -> Result<Vec<DetectedFace>, DetectionError> {
    check_output_shapes(reg_data.len(), score_data.len())?;

    let fw = frame.width as f32;
    let fh = frame.height as f32;
    let scale = INPUT_SIZE as f32;

    let mut candidates: Vec<([f64; 4], f64)> = Vec::new();
    let mut keypoints: Vec<Vec<SourcePoint>> = Vec::new();

    for (i, (&raw_score, anchor)) in score_data.iter().zip(anchors).enumerate() {
        let score = sigmoid(raw_score);
        if (score as f64) < confidence {
            continue;
        }

        let offset = i * REGRESSOR_STRIDE;
        let reg = &reg_data[offset..offset + REGRESSOR_STRIDE];
        let anchor = *anchor;

        // Decode box center + size relative to anchor
        let cx = anchor[0] + reg[0] / scale;
        let cy = anchor[1] + reg[1] / scale;
        let w = reg[2] / scale;
        let h = reg[3] / scale;

        let x1 = ((cx - w / 2.0) * fw).max(0.0);
        let y1 = ((cy - h / 2.0) * fh).max(0.0);
        let x2 = ((cx + w / 2.0) * fw).min(fw);
        let y2 = ((cy + h / 2.0) * fh).min(fh);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let points = (0..NUM_KEYPOINTS)
            .map(|k| {
                let kx = anchor[0] + reg[4 + k * 2] / scale;
                let ky = anchor[1] + reg[5 + k * 2] / scale;
                SourcePoint::new((kx * fw) as f64, (ky * fh) as f64)
            })
            .collect();

        candidates.push(([x1 as f64, y1 as f64, x2 as f64, y2 as f64], score as f64));
        keypoints.push(points);
    }

    Ok(nms(&candidates, NMS_IOU_THRESH)
        .into_iter()
        .map(|i| {
            let ([x1, y1, x2, y2], score) = candidates[i];
            DetectedFace::new(SourceRect::new(x1, y1, x2, y2), score)
                .with_landmarks(keypoints[i].clone())
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Anchor generation (BlazeFace short-range)
// ---------------------------------------------------------------------------

/// Generate BlazeFace anchors for the short-range model.
///
/// The short-range model uses two feature map sizes: 16×16 and 8×8,
/// with 2 and 6 anchors per cell respectively.
fn generate_anchors() -> Vec<[f32; 2]> {
    let strides = [(8, 2), (16, 6)]; // (stride, anchors_per_cell)
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for &(stride, num) in &strides {
        let grid_size = INPUT_SIZE as usize / stride;
        for y in 0..grid_size {
            for x in 0..grid_size {
                let cx = (x as f32 + 0.5) / grid_size as f32;
                let cy = (y as f32 + 0.5) / grid_size as f32;
                for _ in 0..num {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    /// Raw logit that passes the default threshold comfortably.
    const HIGH_LOGIT: f32 = 4.0;

    fn empty_outputs() -> (Vec<f32>, Vec<f32>) {
        (
            vec![0.0; NUM_ANCHORS * REGRESSOR_STRIDE],
            vec![-10.0; NUM_ANCHORS],
        )
    }

    #[test]
    fn test_generate_anchors_count() {
        // 16×16 grid × 2 anchors + 8×8 grid × 6 anchors = 512 + 384 = 896
        assert_eq!(generate_anchors().len(), NUM_ANCHORS);
    }

    #[test]
    fn test_anchors_in_unit_range() {
        for a in &generate_anchors() {
            assert!(a[0] > 0.0 && a[0] < 1.0);
            assert!(a[1] > 0.0 && a[1] < 1.0);
        }
    }

    #[test]
    fn test_decode_below_threshold_is_empty() {
        let (reg, scores) = empty_outputs();
        let faces = decode(&reg, &scores, &generate_anchors(), 0.5, Size::new(640, 480)).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_decode_maps_box_into_frame_space() {
        let anchors = generate_anchors();
        let (mut reg, mut scores) = empty_outputs();
        // Anchor 0 sits at (1/32, 1/32); shift it to the image centre and
        // give it a 32x32 (model px) extent.
        let dx = (0.5 - anchors[0][0]) * INPUT_SIZE as f32;
        let dy = (0.5 - anchors[0][1]) * INPUT_SIZE as f32;
        reg[0] = dx;
        reg[1] = dy;
        reg[2] = 32.0;
        reg[3] = 32.0;
        scores[0] = HIGH_LOGIT;

        let faces = decode(&reg, &scores, &anchors, 0.5, Size::new(640, 480)).unwrap();
        assert_eq!(faces.len(), 1);
        let b = faces[0].bounding_box;
        // 32/128 of the frame around the centre
        assert_relative_eq!(b.x1, 320.0 - 80.0, epsilon = 1e-3);
        assert_relative_eq!(b.x2, 320.0 + 80.0, epsilon = 1e-3);
        assert_relative_eq!(b.y1, 240.0 - 60.0, epsilon = 1e-3);
        assert_relative_eq!(b.y2, 240.0 + 60.0, epsilon = 1e-3);
        assert_eq!(faces[0].landmarks.len(), NUM_KEYPOINTS);
        assert!(faces[0].score > 0.9);
    }

    #[test]
    fn test_decode_suppresses_duplicates() {
        let anchors = generate_anchors();
        let (mut reg, mut scores) = empty_outputs();
        // Anchors 0 and 1 share a cell: identical boxes.
        for i in 0..2 {
            reg[i * REGRESSOR_STRIDE + 2] = 16.0;
            reg[i * REGRESSOR_STRIDE + 3] = 16.0;
            scores[i] = HIGH_LOGIT;
        }
        let faces = decode(&reg, &scores, &anchors, 0.5, Size::new(128, 128)).unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[rstest]
    #[case::short_regressors(NUM_ANCHORS * REGRESSOR_STRIDE - 4, NUM_ANCHORS)]
    #[case::wrong_stride(NUM_ANCHORS * 18, NUM_ANCHORS)]
    #[case::short_scores(NUM_ANCHORS * REGRESSOR_STRIDE, NUM_ANCHORS / 2)]
    fn test_output_shape_mismatch_is_fatal(#[case] reg_len: usize, #[case] score_len: usize) {
        let reg = vec![0.0; reg_len];
        let mut scores = vec![-10.0; score_len];
        scores[0] = HIGH_LOGIT;
        let err = decode(&reg, &scores, &generate_anchors(), 0.5, Size::new(64, 64)).unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }
}
