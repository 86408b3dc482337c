use serde::{Deserialize, Serialize};

use crate::overlay::domain::overlay_renderer::RenderError;
use crate::shared::geometry::{DisplayPoint, DisplayRect, Size};

/// Straight (non-premultiplied) RGBA colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub color: Color,
    pub line_width: f64,
}

/// 2D drawing target for overlays, sized in display-space pixels.
///
/// Only display-space geometry is accepted; detector output has to pass
/// through a transformer first.
pub trait DisplaySurface: Send {
    fn size(&self) -> Size;

    /// Changes the drawable area. Contents after a resize are unspecified
    /// until the next `clear`.
    fn resize(&mut self, size: Size);

    /// Erases everything drawn so far.
    fn clear(&mut self);

    /// Outlines `rect`.
    fn draw_rect(&mut self, rect: &DisplayRect, stroke: &StrokeStyle);

    /// Filled dot of `radius` pixels centred on `at`.
    fn draw_point(&mut self, at: DisplayPoint, radius: f64, color: Color);

    /// Text with its top-left corner at `at`.
    fn draw_text(&mut self, text: &str, at: DisplayPoint, color: Color);

    /// Called once a complete overlay has been drawn.
    fn present(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}
