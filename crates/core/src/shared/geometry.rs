//! Space-tagged geometry.
//!
//! Detector output lives in [`SourceSpace`] (pixels of the captured frame);
//! drawing happens in [`DisplaySpace`] (pixels of the rendering surface).
//! The two are distinct types so a source rectangle can only reach a surface
//! through a [`CoordinateTransformer`].

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Pixel coordinate system of the raw captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceSpace;

/// Pixel coordinate system of the rendering surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySpace;

/// Width/height pair in whole pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Size {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `640x480`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid width '{w}': {e}"))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid height '{h}': {e}"))?;
        Ok(Size::new(width, height))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point<S> {
    pub x: f64,
    pub y: f64,
    space: PhantomData<S>,
}

pub type SourcePoint = Point<SourceSpace>;
pub type DisplayPoint = Point<DisplaySpace>;

impl<S> Point<S> {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Axis-aligned rectangle given by its top-left `(x1, y1)` and
/// bottom-right `(x2, y2)` corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect<S> {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    space: PhantomData<S>,
}

pub type SourceRect = Rect<SourceSpace>;
pub type DisplayRect = Rect<DisplaySpace>;

impl<S> Rect<S> {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            space: PhantomData,
        }
    }

    pub fn from_corners(top_left: Point<S>, bottom_right: Point<S>) -> Self {
        Self::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y)
    }

    /// Zero-area rectangle at the origin.
    pub fn degenerate() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub fn top_left(&self) -> Point<S> {
        Point::new(self.x1, self.y1)
    }

    pub fn bottom_right(&self) -> Point<S> {
        Point::new(self.x2, self.y2)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Intersects the rectangle with `[0, width] x [0, height]`.
    ///
    /// Corners are normalized first, so a box given bottom-right-first still
    /// clamps to the same area.
    pub fn clamp_to(&self, bounds: Size) -> Self {
        let w = bounds.width as f64;
        let h = bounds.height as f64;
        let (lx, hx) = (self.x1.min(self.x2), self.x1.max(self.x2));
        let (ly, hy) = (self.y1.min(self.y2), self.y1.max(self.y2));
        Self::new(lx.clamp(0.0, w), ly.clamp(0.0, h), hx.clamp(0.0, w), hy.clamp(0.0, h))
    }
}

/// Linear map between two pixel spaces with independent X/Y scale factors.
///
/// A transformer built from an unready source (zero width or height) is
/// degenerate: it maps everything to the zero rectangle instead of producing
/// NaN or infinity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateTransformer<Src, Dst> {
    scale_x: f64,
    scale_y: f64,
    degenerate: bool,
    spaces: PhantomData<(Src, Dst)>,
}

pub type SourceToDisplay = CoordinateTransformer<SourceSpace, DisplaySpace>;
pub type DisplayToSource = CoordinateTransformer<DisplaySpace, SourceSpace>;

impl<Src, Dst> CoordinateTransformer<Src, Dst> {
    /// Scale factors `dst / src` for each axis.
    pub fn between(src: Size, dst: Size) -> Self {
        if src.is_empty() {
            return Self::degenerate();
        }
        Self::from_scale(
            dst.width as f64 / src.width as f64,
            dst.height as f64 / src.height as f64,
        )
    }

    pub fn from_scale(scale_x: f64, scale_y: f64) -> Self {
        let valid = scale_x.is_finite() && scale_y.is_finite() && scale_x >= 0.0 && scale_y >= 0.0;
        Self {
            scale_x: if valid { scale_x } else { 0.0 },
            scale_y: if valid { scale_y } else { 0.0 },
            degenerate: !valid,
            spaces: PhantomData,
        }
    }

    pub fn degenerate() -> Self {
        Self {
            scale_x: 0.0,
            scale_y: 0.0,
            degenerate: true,
            spaces: PhantomData,
        }
    }

    pub fn scale_x(&self) -> f64 {
        self.scale_x
    }

    pub fn scale_y(&self) -> f64 {
        self.scale_y
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn map_point(&self, p: Point<Src>) -> Point<Dst> {
        if self.degenerate {
            return Point::origin();
        }
        let mapped = Point::new(p.x * self.scale_x, p.y * self.scale_y);
        if mapped.x.is_finite() && mapped.y.is_finite() {
            mapped
        } else {
            Point::origin()
        }
    }

    pub fn map_rect(&self, r: &Rect<Src>) -> Rect<Dst> {
        if self.degenerate {
            return Rect::degenerate();
        }
        let mapped = Rect::new(
            r.x1 * self.scale_x,
            r.y1 * self.scale_y,
            r.x2 * self.scale_x,
            r.y2 * self.scale_y,
        );
        if mapped.is_finite() {
            mapped
        } else {
            Rect::degenerate()
        }
    }

    /// The reverse mapping (swapped scale factors).
    ///
    /// A zero scale cannot be undone, so the inverse of a collapsing
    /// transformer is degenerate.
    pub fn inverse(&self) -> CoordinateTransformer<Dst, Src> {
        if self.degenerate || self.scale_x == 0.0 || self.scale_y == 0.0 {
            return CoordinateTransformer::degenerate();
        }
        CoordinateTransformer::from_scale(1.0 / self.scale_x, 1.0 / self.scale_y)
    }
}

impl SourceToDisplay {
    pub fn new(source: Size, display: Size) -> Self {
        Self::between(source, display)
    }
}
