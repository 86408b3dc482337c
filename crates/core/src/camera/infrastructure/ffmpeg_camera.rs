use std::time::Duration;

use crate::camera::domain::camera_provider::{
    CameraError, CameraProvider, CameraStream, InterruptFlag, StreamInterrupt,
};
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

/// Upper bound for one blocked network read unless `rw_timeout` is given.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens capture devices, network streams or video files through ffmpeg-next
/// (libavdevice + libavformat + libavcodec).
///
/// `source` is whatever the input format expects: `/dev/video0` for `v4l2`,
/// `"0"` for `avfoundation`, `video=Integrated Camera` for `dshow`, or a
/// plain URL/path when no format is given.
///
/// Reads are bounded by `rw_timeout` for protocols that honour it, so an
/// interrupted stream returns within one read timeout even when the
/// source has stalled.
pub struct FfmpegCamera {
    source: String,
    format: Option<String>,
    options: Vec<(String, String)>,
    read_timeout: Duration,
}

impl FfmpegCamera {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: None,
            options: Vec::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Selects a specific input device format, e.g. `v4l2`.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Adds a demuxer option such as `video_size=640x480` or `framerate=30`.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Demuxer options, with `rw_timeout` filled in unless set explicitly.
    fn input_options(&self) -> Vec<(String, String)> {
        let mut options = self.options.clone();
        if !options.iter().any(|(k, _)| k == "rw_timeout") {
            options.push((
                "rw_timeout".to_string(),
                self.read_timeout.as_micros().to_string(),
            ));
        }
        options
    }

    fn open_input(&self) -> Result<ffmpeg_next::format::context::Input, CameraError> {
        let mut dict = ffmpeg_next::Dictionary::new();
        for (k, v) in &self.input_options() {
            dict.set(k, v);
        }

        match &self.format {
            Some(name) => {
                let input_format = ffmpeg_next::device::input::video()
                    .find(|f| f.name() == name)
                    .ok_or_else(|| {
                        CameraError::Unavailable(format!("input format '{name}' not available"))
                    })?;
                let ctx = ffmpeg_next::format::open_with(
                    &self.source,
                    &ffmpeg_next::format::Format::Input(input_format),
                    dict,
                )
                .map_err(|e| open_error(&self.source, e))?;
                Ok(ctx.input())
            }
            None => ffmpeg_next::format::input_with_dictionary(&self.source, dict)
                .map_err(|e| open_error(&self.source, e)),
        }
    }
}

impl CameraProvider for FfmpegCamera {
    fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        ffmpeg_next::init().map_err(|e| CameraError::Unavailable(e.to_string()))?;
        ffmpeg_next::device::register_all();

        let ictx = self.open_input()?;
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| CameraError::Unavailable("No video stream found".into()))?;
        let video_stream_index = stream.index();

        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| CameraError::Unavailable(e.to_string()))?;

        log::info!("Opened {} ({width}x{height})", self.source);

        Ok(Box::new(FfmpegCameraStream {
            inner: Some(Decoding {
                ictx,
                decoder,
                scaler,
                video_stream_index,
                flushing: false,
            }),
            size: Size::new(width, height),
            frame_index: 0,
            interrupted: InterruptFlag::new(),
        }))
    }
}

fn open_error(source: &str, e: ffmpeg_next::Error) -> CameraError {
    match e {
        ffmpeg_next::Error::Other {
            errno: ffmpeg_next::util::error::EACCES,
        } => CameraError::Denied(format!("{source}: {e}")),
        _ => CameraError::Unavailable(format!("{source}: {e}")),
    }
}

struct Decoding {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    flushing: bool,
}

/// Pull-based decoder over one opened input. Stopping drops the demuxer,
/// which closes the device.
pub struct FfmpegCameraStream {
    inner: Option<Decoding>,
    size: Size,
    frame_index: usize,
    interrupted: InterruptFlag,
}

// Safety: FfmpegCameraStream is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegCameraStream {}

impl Decoding {
    fn try_receive(&mut self, size: Size, index: usize) -> Option<Result<Frame, CameraError>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return None;
        }
        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb_frame) {
            return Some(Err(CameraError::Capture(e.to_string())));
        }
        let pixels = extract_rgb_pixels(&rgb_frame, size.width, size.height);
        Some(Ok(Frame::new(pixels, size.width, size.height, index)))
    }

    /// Feeds packets until a frame is decoded. `None` at end of input or
    /// once `interrupted` is raised.
    fn next(
        &mut self,
        size: Size,
        index: usize,
        interrupted: &InterruptFlag,
    ) -> Option<Result<Frame, CameraError>> {
        if let Some(result) = self.try_receive(size, index) {
            return Some(result);
        }
        if self.flushing {
            return None;
        }

        loop {
            if interrupted.is_raised() {
                return None;
            }

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => {
                    let _ = self.decoder.send_eof();
                    self.flushing = true;
                    return self.try_receive(size, index);
                }
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::util::error::EAGAIN,
                }) => continue,
                Err(e) => return Some(Err(CameraError::Capture(e.to_string()))),
            }

            if packet.stream() != self.video_stream_index {
                continue;
            }

            if let Err(e) = self.decoder.send_packet(&packet) {
                log::debug!("Dropping undecodable packet: {e}");
                continue;
            }

            if let Some(result) = self.try_receive(size, index) {
                return Some(result);
            }
        }
    }
}

impl CameraStream for FfmpegCameraStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(decoding) = self.inner.as_mut() else {
            return Ok(None);
        };
        match decoding.next(self.size, self.frame_index, &self.interrupted) {
            Some(Ok(frame)) => {
                self.frame_index += 1;
                Ok(Some(frame))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn native_size(&self) -> Option<Size> {
        Some(self.size)
    }

    fn stop_tracks(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("Camera tracks stopped after {} frames", self.frame_index);
        }
    }

    fn interrupt_handle(&self) -> StreamInterrupt {
        self.interrupted.handle()
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
/// This function strips that padding to produce a tightly-packed pixel buffer.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
