use std::path::{Path, PathBuf};

use crate::camera::domain::camera_provider::{
    CameraError, CameraProvider, CameraStream, InterruptFlag, StreamInterrupt,
};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

/// Plays a directory of still images as a camera feed.
///
/// Files are ordered by name and decoded lazily, one per `next_frame` call.
/// With `looping` the sequence restarts after the last file, which makes a
/// handful of stills behave like a live camera that never ends.
pub struct ImageSequenceCamera {
    paths: Vec<PathBuf>,
    looping: bool,
}

impl ImageSequenceCamera {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            looping: false,
        }
    }

    /// Collects every image file directly inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        paths.sort();
        log::debug!("Found {} images in {}", paths.len(), dir.display());
        Ok(Self::new(paths))
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl CameraProvider for ImageSequenceCamera {
    fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        if self.paths.is_empty() {
            return Err(CameraError::Unavailable("image sequence is empty".into()));
        }
        Ok(Box::new(ImageSequenceStream {
            paths: self.paths.clone(),
            looping: self.looping,
            cursor: 0,
            frame_index: 0,
            size: None,
            stopped: false,
            interrupted: InterruptFlag::new(),
        }))
    }
}

pub struct ImageSequenceStream {
    paths: Vec<PathBuf>,
    looping: bool,
    cursor: usize,
    frame_index: usize,
    size: Option<Size>,
    stopped: bool,
    interrupted: InterruptFlag,
}

impl CameraStream for ImageSequenceStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.stopped || self.interrupted.is_raised() {
            return Ok(None);
        }
        if self.cursor >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        self.cursor += 1;
        let img = image::open(path)
            .map_err(|e| CameraError::Capture(format!("{}: {e}", path.display())))?
            .to_rgb8();

        let frame = Frame::from_rgb_image(img, self.frame_index);
        self.frame_index += 1;
        self.size = Some(frame.size());
        Ok(Some(frame))
    }

    fn native_size(&self) -> Option<Size> {
        self.size
    }

    fn stop_tracks(&mut self) {
        self.stopped = true;
    }

    fn interrupt_handle(&self) -> StreamInterrupt {
        self.interrupted.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(dir: &Path, name: &str, width: u32, height: u32, value: u8) -> PathBuf {
        let path = dir.join(name);
        let mut img = image::RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgb([value, 100, 200]);
        }
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_from_dir_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "b.png", 4, 4, 2);
        write_image(dir.path(), "a.png", 4, 4, 1);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let camera = ImageSequenceCamera::from_dir(dir.path()).unwrap();
        assert_eq!(camera.len(), 2);
        assert!(camera.paths[0].ends_with("a.png"));
    }

    #[test]
    fn test_from_missing_dir_fails() {
        assert!(ImageSequenceCamera::from_dir(Path::new("/nonexistent/frames")).is_err());
    }

    #[test]
    fn test_empty_sequence_is_unavailable() {
        let camera = ImageSequenceCamera::new(Vec::new());
        assert!(matches!(
            camera.acquire(),
            Err(CameraError::Unavailable(_))
        ));
    }

    #[test]
    fn test_frames_in_order_then_end() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "0.png", 6, 4, 10);
        write_image(dir.path(), "1.png", 6, 4, 20);

        let camera = ImageSequenceCamera::from_dir(dir.path()).unwrap();
        let mut stream = camera.acquire().unwrap();
        assert_eq!(stream.native_size(), None);

        let first = stream.next_frame().unwrap().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(first.data()[0], 10);
        assert_eq!(stream.native_size(), Some(Size::new(6, 4)));

        let second = stream.next_frame().unwrap().unwrap();
        assert_eq!(second.index(), 1);
        assert_eq!(second.data()[0], 20);

        assert!(stream.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_looping_restarts_and_keeps_counting() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "only.png", 2, 2, 5);

        let camera = ImageSequenceCamera::from_dir(dir.path())
            .unwrap()
            .looping(true);
        let mut stream = camera.acquire().unwrap();
        for expected in 0..3 {
            let frame = stream.next_frame().unwrap().unwrap();
            assert_eq!(frame.index(), expected);
        }
    }

    #[test]
    fn test_stop_tracks_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "only.png", 2, 2, 5);

        let camera = ImageSequenceCamera::from_dir(dir.path())
            .unwrap()
            .looping(true);
        let mut stream = camera.acquire().unwrap();
        assert!(stream.next_frame().unwrap().is_some());
        stream.stop_tracks();
        assert!(stream.next_frame().unwrap().is_none());
        stream.stop_tracks();
    }

    #[test]
    fn test_interrupt_ends_looping_stream_from_another_thread() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "only.png", 2, 2, 5);

        let camera = ImageSequenceCamera::from_dir(dir.path())
            .unwrap()
            .looping(true);
        let mut stream = camera.acquire().unwrap();
        assert!(stream.next_frame().unwrap().is_some());

        let interrupt = stream.interrupt_handle();
        std::thread::spawn(move || interrupt()).join().unwrap();
        assert!(stream.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_file_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let camera = ImageSequenceCamera::new(vec![path]);
        let mut stream = camera.acquire().unwrap();
        assert!(matches!(
            stream.next_frame(),
            Err(CameraError::Capture(_))
        ));
    }
}
