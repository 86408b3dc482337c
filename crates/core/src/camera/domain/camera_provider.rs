use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera access denied: {0}")]
    Denied(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// Callable from any thread; makes a blocked or later `next_frame` return
/// `Ok(None)`. The stream still has to be released afterwards.
pub type StreamInterrupt = Arc<dyn Fn() + Send + Sync>;

/// One-way "stop reading" flag shared between a stream and its interrupt
/// handle.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// An interrupt handle that raises this flag.
    pub fn handle(&self) -> StreamInterrupt {
        let flag = self.clone();
        Arc::new(move || flag.raise())
    }
}

/// An open media stream delivering frames on demand.
///
/// Frames are pulled one at a time; nothing is buffered ahead of the reader.
pub trait CameraStream: Send {
    /// Blocks until the next frame is available.
    ///
    /// `Ok(None)` means the stream has ended (file exhausted or tracks stopped).
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Native frame size, once known.
    fn native_size(&self) -> Option<Size>;

    /// Stops every track and releases the underlying device. Idempotent.
    fn stop_tracks(&mut self);

    /// Handle for unblocking `next_frame` from another thread, used when a
    /// session is stopped while the stream has not delivered a frame.
    fn interrupt_handle(&self) -> StreamInterrupt;
}

/// Opens and closes camera streams.
pub trait CameraProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError>;

    /// Hands a stream back; the default stops its tracks.
    fn release(&self, mut stream: Box<dyn CameraStream>) {
        stream.stop_tracks();
    }
}
