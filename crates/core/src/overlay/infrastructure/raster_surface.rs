use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use crate::overlay::domain::display_surface::{Color, DisplaySurface, StrokeStyle};
use crate::overlay::domain::overlay_renderer::RenderError;
use crate::shared::geometry::{DisplayPoint, DisplayRect, Size};

/// Label text height in pixels.
const TEXT_SCALE: f32 = 14.0;

/// Space between the label text and the edge of its plate.
const PLATE_PADDING: i32 = 1;

/// Approximate advance per character, used to size plates without a font.
const FALLBACK_GLYPH_WIDTH: u32 = 7;

/// Plate drawn behind label text.
const PLATE_COLOR: Color = Color::rgba(0, 0, 0, 160);

/// Fonts tried by [`RasterSurface::with_system_font`], in order.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// In-memory RGBA overlay.
///
/// The overlay is transparent outside what has been drawn, so it can be
/// composited over the video. Labels are rendered on a dark plate in the
/// requested colour once a font is loaded; without one only the plate is
/// drawn. The label list of the last presented overlay is available through
/// [`RasterSurface::presented_labels`]. With a snapshot directory every
/// presented overlay is also written as a PNG.
pub struct RasterSurface {
    image: RgbaImage,
    font: Option<FontVec>,
    labels: Vec<String>,
    presented_labels: Vec<String>,
    presented: usize,
    snapshot_dir: Option<PathBuf>,
}

impl RasterSurface {
    pub fn new(size: Size) -> Self {
        Self {
            image: RgbaImage::new(size.width, size.height),
            font: None,
            labels: Vec::new(),
            presented_labels: Vec::new(),
            presented: 0,
            snapshot_dir: None,
        }
    }

    /// Writes `overlay_NNNNNN.png` into `dir` on every present.
    pub fn with_snapshot_dir(mut self, dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(dir)?;
        self.snapshot_dir = Some(dir.to_path_buf());
        Ok(self)
    }

    /// Renders label text with the TrueType/OpenType font at `path`.
    pub fn with_font(mut self, path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        self.font = Some(load_font(path)?);
        Ok(self)
    }

    /// Uses the first common system font that loads. Labels stay as plates
    /// when none is found.
    pub fn with_system_font(mut self) -> Self {
        for path in SYSTEM_FONT_CANDIDATES.iter().map(Path::new) {
            if !path.is_file() {
                continue;
            }
            match load_font(path) {
                Ok(font) => {
                    log::debug!("Using label font {}", path.display());
                    self.font = Some(font);
                    return self;
                }
                Err(e) => log::warn!("Ignoring {e}"),
            }
        }
        log::debug!("No system font found, labels are drawn as plates");
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn presented_count(&self) -> usize {
        self.presented
    }

    pub fn presented_labels(&self) -> &[String] {
        &self.presented_labels
    }

    fn text_extent(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(PxScale::from(TEXT_SCALE), font, text),
            None => (
                text.chars().count() as u32 * FALLBACK_GLYPH_WIDTH,
                TEXT_SCALE as u32,
            ),
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read font {}: {e}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|e| format!("invalid font {}: {e}", path.display()))
}

#[cfg(test)]
fn find_system_font() -> Option<PathBuf> {
    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// `Rect` spanning `x..x+w`, `y..y+h`; `None` when either side is empty.
fn rect_at(x: i32, y: i32, w: i32, h: i32) -> Option<Rect> {
    (w > 0 && h > 0).then(|| Rect::at(x, y).of_size(w as u32, h as u32))
}

impl DisplaySurface for RasterSurface {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    fn resize(&mut self, size: Size) {
        if self.size() != size {
            log::debug!("Resizing overlay surface to {size}");
            self.image = RgbaImage::new(size.width, size.height);
        }
    }

    fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba(Color::TRANSPARENT.to_array());
        }
        self.labels.clear();
    }

    fn draw_rect(&mut self, rect: &DisplayRect, stroke: &StrokeStyle) {
        let lw = stroke.line_width.max(1.0).round() as i32;
        let x = rect.x1.round() as i32;
        let y = rect.y1.round() as i32;
        let w = rect.x2.round() as i32 - x;
        let h = rect.y2.round() as i32 - y;
        let px = Rgba(stroke.color.to_array());

        // Thick outlines are nested one-pixel outlines growing inwards.
        for inset in 0..lw {
            match rect_at(x + inset, y + inset, w - 2 * inset, h - 2 * inset) {
                Some(r) => draw_hollow_rect_mut(&mut self.image, r, px),
                None => break,
            }
        }
    }

    fn draw_point(&mut self, at: DisplayPoint, radius: f64, color: Color) {
        let r = radius.round().max(1.0) as i32;
        let centre = (at.x.round() as i32, at.y.round() as i32);
        draw_filled_circle_mut(&mut self.image, centre, r, Rgba(color.to_array()));
    }

    fn draw_text(&mut self, text: &str, at: DisplayPoint, color: Color) {
        let x = at.x.round() as i32;
        let y = at.y.round() as i32;
        let (w, h) = self.text_extent(text);
        let plate = rect_at(
            x,
            y,
            w as i32 + 2 * PLATE_PADDING,
            h as i32 + 2 * PLATE_PADDING,
        );
        if let Some(plate) = plate {
            draw_filled_rect_mut(&mut self.image, plate, Rgba(PLATE_COLOR.to_array()));
        }
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut self.image,
                Rgba(color.to_array()),
                x + PLATE_PADDING,
                y + PLATE_PADDING,
                PxScale::from(TEXT_SCALE),
                font,
                text,
            );
        }
        self.labels.push(text.to_string());
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.presented_labels = self.labels.clone();
        if let Some(dir) = &self.snapshot_dir {
            let path = dir.join(format!("overlay_{:06}.png", self.presented));
            self.image
                .save(&path)
                .map_err(|e| RenderError::Present(format!("{}: {e}", path.display())))?;
        }
        self.presented += 1;
        Ok(())
    }
}
