use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::detected_face::{DetectedFace, FaceAttributes};
use crate::overlay::domain::display_surface::{Color, DisplaySurface, StrokeStyle};
use crate::shared::geometry::{DisplayPoint, Size, SourceToDisplay};

/// Vertical room reserved above a box for its label.
const LABEL_OFFSET: f64 = 16.0;

const LABEL_SEPARATOR: &str = " · ";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("display surface unavailable (size {0})")]
    SurfaceUnavailable(Size),
    #[error("failed to present overlay: {0}")]
    Present(String),
}

/// Colours and sizes used for overlays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub box_color: Color,
    pub line_width: f64,
    pub draw_landmarks: bool,
    pub landmark_color: Color,
    pub landmark_radius: f64,
    pub draw_labels: bool,
    pub label_color: Color,
    /// When set, every expression scoring at least this much is listed
    /// instead of only the dominant one.
    pub min_expression_confidence: Option<f32>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: Color::BLUE,
            line_width: 2.0,
            draw_landmarks: true,
            landmark_color: Color::BLUE,
            landmark_radius: 2.0,
            draw_labels: true,
            label_color: Color::WHITE,
            min_expression_confidence: None,
        }
    }
}

/// What one render call put on the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub boxes: usize,
    pub landmarks: usize,
    pub labels: usize,
}

/// Draws one cycle's faces onto a display surface.
///
/// Every call starts from a cleared surface, so an empty face list leaves
/// an empty overlay rather than the previous cycle's boxes.
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Renders `faces`, whose geometry is in the `source` frame's space.
    ///
    /// A zero-area surface is reported as [`RenderError::SurfaceUnavailable`]
    /// without touching it.
    pub fn render(
        &self,
        surface: &mut dyn DisplaySurface,
        faces: &[DetectedFace],
        source: Size,
    ) -> Result<RenderStats, RenderError> {
        let display = surface.size();
        if display.is_empty() {
            return Err(RenderError::SurfaceUnavailable(display));
        }

        surface.clear();
        let transform = SourceToDisplay::new(source, display);
        let stroke = StrokeStyle {
            color: self.style.box_color,
            line_width: self.style.line_width,
        };
        let mut stats = RenderStats::default();

        for face in faces {
            let rect = transform.map_rect(&face.bounding_box);
            if rect.is_degenerate() {
                log::trace!("Skipping degenerate box for face at {:?}", face.bounding_box);
                continue;
            }
            surface.draw_rect(&rect, &stroke);
            stats.boxes += 1;

            if self.style.draw_landmarks {
                for &point in &face.landmarks {
                    surface.draw_point(
                        transform.map_point(point),
                        self.style.landmark_radius,
                        self.style.landmark_color,
                    );
                    stats.landmarks += 1;
                }
            }

            if self.style.draw_labels {
                let label = face_label_with(&face.attributes, self.style.min_expression_confidence);
                if let Some(label) = label {
                    let at = DisplayPoint::new(rect.x1, (rect.y1 - LABEL_OFFSET).max(0.0));
                    surface.draw_text(&label, at, self.style.label_color);
                    stats.labels += 1;
                }
            }
        }

        surface.present()?;
        Ok(stats)
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(OverlayStyle::default())
    }
}

/// Text shown next to a face, built from whatever attributes are present.
///
/// `"34 years old Female · happy (91%)"`; `None` when nothing is known yet.
pub fn face_label(attributes: &FaceAttributes) -> Option<String> {
    face_label_with(attributes, None)
}

/// Like [`face_label`], but with `min_expression_confidence` set every
/// expression at or above it is listed, highest first:
/// `"happy (60%) · surprised (30%)"`.
pub fn face_label_with(
    attributes: &FaceAttributes,
    min_expression_confidence: Option<f32>,
) -> Option<String> {
    let mut parts = Vec::with_capacity(2);

    if let Some(ag) = &attributes.age_gender {
        let age = if ag.age.is_finite() {
            Some(format!("{} years old", ag.age.round() as i64))
        } else {
            None
        };
        let gender = (!ag.gender.is_empty()).then_some(ag.gender.as_str());
        match (age, gender) {
            (Some(age), Some(gender)) => parts.push(format!("{age} {gender}")),
            (Some(age), None) => parts.push(age),
            (None, Some(gender)) => parts.push(gender.to_string()),
            (None, None) => {}
        }
    }

    if let Some(expressions) = &attributes.expressions {
        let shown = match min_expression_confidence {
            Some(min) => expressions.above(min),
            None => expressions.dominant().into_iter().collect(),
        };
        parts.extend(
            shown
                .into_iter()
                .map(|(label, score)| format!("{label} ({}%)", (score * 100.0).round() as i64)),
        );
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(LABEL_SEPARATOR))
    }
}
