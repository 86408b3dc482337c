use ndarray::ArrayView3;

use crate::shared::geometry::{Size, SourceRect};

const RGB_CHANNELS: usize = 3;

/// One sampled instant of a video source: tightly packed RGB24 bytes in
/// row-major order, plus its native dimensions and capture index.
///
/// Frames live for one detection cycle. Conversion from camera pixel
/// formats happens in the camera adapters only.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * RGB_CHANNELS,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// `(height, width, 3)` view for tensor preprocessing.
    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(
            (self.height as usize, self.width as usize, RGB_CHANNELS),
            &self.data,
        )
        .ok()
    }

    /// Copies the pixels under `rect`, clamped to the frame bounds.
    ///
    /// Returns `None` when the clamped area is empty.
    pub fn crop(&self, rect: &SourceRect) -> Option<Frame> {
        let clamped = rect.clamp_to(self.size());
        let x1 = clamped.x1.floor() as usize;
        let y1 = clamped.y1.floor() as usize;
        let x2 = (clamped.x2.ceil() as usize).min(self.width as usize);
        let y2 = (clamped.y2.ceil() as usize).min(self.height as usize);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let crop_w = x2 - x1;
        let crop_h = y2 - y1;
        let row_bytes = self.width as usize * RGB_CHANNELS;
        let mut data = Vec::with_capacity(crop_w * crop_h * RGB_CHANNELS);
        for row in y1..y2 {
            let start = row * row_bytes + x1 * RGB_CHANNELS;
            data.extend_from_slice(&self.data[start..start + crop_w * RGB_CHANNELS]);
        }

        Some(Frame::new(data, crop_w as u32, crop_h as u32, self.index))
    }

    /// Consumes the frame into an `image` buffer.
    pub fn into_rgb_image(self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data)
    }

    pub fn from_rgb_image(img: image::RgbImage, index: usize) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, index)
    }
}
