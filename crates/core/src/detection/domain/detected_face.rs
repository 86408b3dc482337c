use std::collections::BTreeMap;

use crate::shared::geometry::{SourcePoint, SourceRect};

/// Estimated age and gender for one face.
#[derive(Clone, Debug, PartialEq)]
pub struct AgeGender {
    pub age: f32,
    pub gender: String,
}

/// Confidence per expression label (e.g. `"happy" -> 0.91`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expressions(BTreeMap<String, f32>);

impl Expressions {
    pub fn new(scores: BTreeMap<String, f32>) -> Self {
        Self(scores)
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest-confidence label. Ties resolve to the alphabetically first label.
    pub fn dominant(&self) -> Option<(&str, f32)> {
        self.0
            .iter()
            .filter(|(_, score)| score.is_finite())
            .fold(None, |best: Option<(&str, f32)>, (label, &score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((label.as_str(), score)),
            })
    }

    /// Labels scoring at least `min_score`, highest first. Equal scores keep
    /// alphabetical order.
    pub fn above(&self, min_score: f32) -> Vec<(&str, f32)> {
        let mut kept: Vec<(&str, f32)> = self
            .0
            .iter()
            .filter(|(_, score)| score.is_finite() && **score >= min_score)
            .map(|(label, &score)| (label.as_str(), score))
            .collect();
        kept.sort_by(|a, b| b.1.total_cmp(&a.1));
        kept
    }
}

impl FromIterator<(String, f32)> for Expressions {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Secondary attributes filled in by enrichment. Every field is optional
/// because each provider only knows about its own subset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceAttributes {
    pub age_gender: Option<AgeGender>,
    pub expressions: Option<Expressions>,
    /// L2-normalized identity embedding of the face crop.
    pub descriptor: Option<Vec<f32>>,
}

impl FaceAttributes {
    pub fn is_empty(&self) -> bool {
        self.age_gender.is_none() && self.expressions.is_none() && self.descriptor.is_none()
    }

    /// Fills fields that are still empty from `other`; populated fields win.
    pub fn merge(&mut self, other: FaceAttributes) {
        if self.age_gender.is_none() {
            self.age_gender = other.age_gender;
        }
        if self.expressions.is_none() {
            self.expressions = other.expressions;
        }
        if self.descriptor.is_none() {
            self.descriptor = other.descriptor;
        }
    }

    /// Cosine similarity of two descriptors, when both faces have one of
    /// the same length.
    pub fn descriptor_similarity(&self, other: &FaceAttributes) -> Option<f32> {
        match (&self.descriptor, &other.descriptor) {
            (Some(a), Some(b)) if a.len() == b.len() && !a.is_empty() => {
                Some(a.iter().zip(b).map(|(x, y)| x * y).sum())
            }
            _ => None,
        }
    }
}

/// One face found in one frame.
///
/// `bounding_box` and `landmarks` are always in the source frame's pixel
/// space. Collections of faces are replaced each cycle; only `attributes`
/// is filled in after detection.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: SourceRect,
    pub score: f64,
    /// Ordered keypoints; empty when the detector provides none.
    pub landmarks: Vec<SourcePoint>,
    pub attributes: FaceAttributes,
}

impl DetectedFace {
    pub fn new(bounding_box: SourceRect, score: f64) -> Self {
        Self {
            bounding_box,
            score,
            landmarks: Vec::new(),
            attributes: FaceAttributes::default(),
        }
    }

    pub fn with_landmarks(mut self, landmarks: Vec<SourcePoint>) -> Self {
        self.landmarks = landmarks;
        self
    }
}
