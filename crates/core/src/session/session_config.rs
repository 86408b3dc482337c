use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::overlay::domain::overlay_renderer::OverlayStyle;
use crate::session::error::ConfigError;
use crate::shared::constants::{
    DEFAULT_CYCLE_INTERVAL_MS, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_CAPTURE_FAILURES,
};
use crate::shared::geometry::Size;

/// When the loop admits its next cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// At most one cycle per interval. A cycle that overruns is followed
    /// immediately by the next one; missed ticks are not replayed.
    FixedInterval { interval_ms: u64 },
    /// As soon as the camera presents another frame.
    NextFrame,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::FixedInterval {
            interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
        }
    }
}

/// How the faces of one cycle are enriched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentMode {
    /// Never call attribute providers.
    Off,
    /// One face after another on the loop thread.
    Sequential,
    /// Faces spread over the rayon pool, all joined before rendering.
    #[default]
    Parallel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pacing: Pacing,
    pub enrichment: EnrichmentMode,
    /// Draw boxes as soon as detection finishes, then redraw with labels
    /// once enrichment has settled.
    pub provisional_render: bool,
    /// Fixed overlay size. `None` matches the surface to each frame.
    pub display_size: Option<Size>,
    pub style: OverlayStyle,
    pub max_consecutive_capture_failures: usize,
    pub event_capacity: usize,
    /// Log a progress line every this many cycles.
    pub log_throttle_cycles: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            enrichment: EnrichmentMode::default(),
            provisional_render: false,
            display_size: None,
            style: OverlayStyle::default(),
            max_consecutive_capture_failures: DEFAULT_MAX_CAPTURE_FAILURES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_throttle_cycles: 30,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Pacing::FixedInterval { interval_ms: 0 } = self.pacing {
            return Err(ConfigError::Invalid(
                "pacing interval must be greater than 0 ms".into(),
            ));
        }
        if self.display_size.is_some_and(|s| s.is_empty()) {
            return Err(ConfigError::Invalid(
                "display size must be non-zero in both dimensions".into(),
            ));
        }
        if self.max_consecutive_capture_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_capture_failures must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be at least 1".into(),
            ));
        }
        if !(self.style.line_width.is_finite() && self.style.line_width > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "line width must be positive, got {}",
                self.style.line_width
            )));
        }
        if let Some(min) = self.style.min_expression_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(ConfigError::Invalid(format!(
                    "min_expression_confidence must be between 0.0 and 1.0, got {min}"
                )));
            }
        }
        Ok(())
    }
}
