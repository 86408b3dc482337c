use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

/// Resize `frame` to `size` (nearest neighbour) and normalize to [0,1] NCHW float32.
///
/// Returns `None` for an empty frame or target size.
pub fn to_nchw(frame: &Frame, size: Size) -> Option<ndarray::Array4<f32>> {
    if frame.size().is_empty() || size.is_empty() {
        return None;
    }
    let src = frame.as_ndarray()?;
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let dst_h = size.height as usize;
    let dst_w = size.width as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, dst_h, dst_w));

    for y in 0..dst_h {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / dst_h as f64) as usize).min(src_h - 1);
        for x in 0..dst_w {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / dst_w as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Some(tensor)
}
