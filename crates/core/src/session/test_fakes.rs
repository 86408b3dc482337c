//! In-crate fakes for camera, detector, attribute provider and surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::camera::domain::camera_provider::{
    CameraError, CameraProvider, CameraStream, InterruptFlag, StreamInterrupt,
};
use crate::detection::domain::attribute_provider::{AttributeProvider, EnrichmentError};
use crate::detection::domain::detected_face::{AgeGender, DetectedFace, FaceAttributes};
use crate::detection::domain::face_detector::{DetectionError, FaceDetector};
use crate::overlay::domain::display_surface::{Color, DisplaySurface, StrokeStyle};
use crate::overlay::domain::overlay_renderer::RenderError;
use crate::shared::frame::Frame;
use crate::shared::geometry::{DisplayPoint, DisplayRect, Size, SourceRect};

pub fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
    Frame::new(vec![value; (width * height * 3) as usize], width, height, 0)
}

pub fn face_at(x1: f64, y1: f64, x2: f64, y2: f64) -> DetectedFace {
    DetectedFace::new(SourceRect::new(x1, y1, x2, y2), 0.9)
}

// ── Camera ──────────────────────────────────────────────────────────

#[derive(Default)]
struct CameraCounters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    open: AtomicUsize,
}

/// Camera producing solid frames of a fixed size.
///
/// Counters are shared between clones so a test can keep a handle after
/// handing the camera to a session.
#[derive(Clone)]
pub struct FakeCamera {
    size: Size,
    frame_limit: Option<usize>,
    fail_reads_from: Option<usize>,
    acquire_error: Option<CameraError>,
    first_frame_gate: Option<Receiver<()>>,
    counters: Arc<CameraCounters>,
}

impl FakeCamera {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            frame_limit: None,
            fail_reads_from: None,
            acquire_error: None,
            first_frame_gate: None,
            counters: Arc::new(CameraCounters::default()),
        }
    }

    /// Ends the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Every read from the `index`-th onwards fails.
    pub fn failing_reads_from(mut self, index: usize) -> Self {
        self.fail_reads_from = Some(index);
        self
    }

    pub fn failing_acquire(mut self, error: CameraError) -> Self {
        self.acquire_error = Some(error);
        self
    }

    /// The first read blocks until the returned sender sends or is dropped.
    pub fn gated_first_frame(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.first_frame_gate = Some(rx);
        (self, tx)
    }

    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// Streams acquired and not yet stopped.
    pub fn open_streams(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }
}

impl CameraProvider for FakeCamera {
    fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        if let Some(e) = &self.acquire_error {
            return Err(e.clone());
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        let (wakeup_tx, wakeup_rx) = crossbeam_channel::bounded(1);
        Ok(Box::new(FakeStream {
            camera: self.clone(),
            reads: 0,
            stopped: false,
            interrupted: InterruptFlag::new(),
            wakeup_tx,
            wakeup_rx,
        }))
    }
}

struct FakeStream {
    camera: FakeCamera,
    reads: usize,
    stopped: bool,
    interrupted: InterruptFlag,
    wakeup_tx: Sender<()>,
    wakeup_rx: Receiver<()>,
}

impl CameraStream for FakeStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.stopped || self.interrupted.is_raised() {
            return Ok(None);
        }
        if self.reads == 0 {
            if let Some(gate) = &self.camera.first_frame_gate {
                crossbeam_channel::select! {
                    recv(gate) -> _ => {},
                    recv(self.wakeup_rx) -> _ => {},
                }
            }
        }
        if self.interrupted.is_raised() {
            return Ok(None);
        }
        let index = self.reads;
        self.reads += 1;

        if self.camera.fail_reads_from.is_some_and(|from| index >= from) {
            return Err(CameraError::Capture(format!("read {index} failed")));
        }
        if self.camera.frame_limit.is_some_and(|limit| index >= limit) {
            return Ok(None);
        }
        let size = self.camera.size;
        let data = vec![128; (size.width * size.height * 3) as usize];
        Ok(Some(Frame::new(data, size.width, size.height, index)))
    }

    fn native_size(&self) -> Option<Size> {
        Some(self.camera.size)
    }

    fn stop_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.camera.counters.open.fetch_sub(1, Ordering::SeqCst);
            self.camera.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn interrupt_handle(&self) -> StreamInterrupt {
        let flag = self.interrupted.clone();
        let wakeup = self.wakeup_tx.clone();
        Arc::new(move || {
            flag.raise();
            let _ = wakeup.try_send(());
        })
    }
}

// ── Detector ────────────────────────────────────────────────────────

/// Detector returning the same faces every call, with optional failures
/// on chosen call numbers and an optional gate for holding a call open.
pub struct ScriptedDetector {
    faces: Vec<DetectedFace>,
    failures: Vec<(usize, bool)>,
    calls: AtomicUsize,
    entered: Option<Sender<usize>>,
    gate: Option<Receiver<()>>,
}

impl ScriptedDetector {
    pub fn always(faces: Vec<DetectedFace>) -> Self {
        Self {
            faces,
            failures: Vec::new(),
            calls: AtomicUsize::new(0),
            entered: None,
            gate: None,
        }
    }

    /// Fails the `call`-th (1-based) call, fatally or recoverably.
    pub fn failing_on(mut self, call: usize, fatal: bool) -> Self {
        self.failures.push((call, fatal));
        self
    }

    /// Every call first reports its number on the returned receiver, then
    /// blocks until the returned sender sends or is dropped.
    pub fn gated(mut self) -> (Self, Receiver<usize>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        self.entered = Some(entered_tx);
        self.gate = Some(gate_rx);
        (self, entered_rx, gate_tx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedFace>, DetectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(entered) = &self.entered {
            let _ = entered.send(call);
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        match self.failures.iter().find(|(n, _)| *n == call) {
            Some((_, true)) => Err(DetectionError::Fatal(format!("model gone on call {call}"))),
            Some((_, false)) => Err(DetectionError::Recoverable(format!("glitch on call {call}"))),
            None => Ok(self.faces.clone()),
        }
    }
}

// ── Attribute provider ──────────────────────────────────────────────

enum Behaviour {
    Attributes(FaceAttributes),
    Fail,
    Panic,
}

pub struct FakeAttributeProvider {
    behaviour: Behaviour,
    input_size: Option<Size>,
    fail_width: Option<u32>,
    seen: Mutex<Vec<Size>>,
}

impl FakeAttributeProvider {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            input_size: None,
            fail_width: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn age_gender(age: f32, gender: &str) -> Self {
        Self::with_behaviour(Behaviour::Attributes(FaceAttributes {
            age_gender: Some(AgeGender {
                age,
                gender: gender.to_string(),
            }),
            ..FaceAttributes::default()
        }))
    }

    pub fn expression(label: &str, score: f32) -> Self {
        Self::with_behaviour(Behaviour::Attributes(FaceAttributes {
            expressions: Some([(label.to_string(), score)].into_iter().collect()),
            ..FaceAttributes::default()
        }))
    }

    pub fn descriptor(values: Vec<f32>) -> Self {
        Self::with_behaviour(Behaviour::Attributes(FaceAttributes {
            descriptor: Some(values),
            ..FaceAttributes::default()
        }))
    }

    pub fn failing() -> Self {
        Self::with_behaviour(Behaviour::Fail)
    }

    pub fn panicking() -> Self {
        Self::with_behaviour(Behaviour::Panic)
    }

    pub fn with_input_size(mut self, size: Size) -> Self {
        self.input_size = Some(size);
        self
    }

    /// Fails for crops exactly `width` pixels wide.
    pub fn failing_for_width(mut self, width: u32) -> Self {
        self.fail_width = Some(width);
        self
    }

    pub fn seen_sizes(&self) -> Vec<Size> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AttributeProvider for FakeAttributeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn input_size(&self) -> Option<Size> {
        self.input_size
    }

    fn enrich(&self, face: &Frame) -> Result<FaceAttributes, EnrichmentError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(face.size());
        let failure = EnrichmentError::Provider {
            provider: "fake".into(),
            message: "scripted failure".into(),
        };
        if self.fail_width == Some(face.width()) {
            return Err(failure);
        }
        match &self.behaviour {
            Behaviour::Attributes(attrs) => Ok(attrs.clone()),
            Behaviour::Fail => Err(failure),
            Behaviour::Panic => panic!("scripted provider panic"),
        }
    }
}

// ── Surface ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCall {
    Resize(Size),
    Clear,
    Rect(DisplayRect),
    Point(DisplayPoint),
    Text(String, DisplayPoint),
    Present,
}

/// Drawing calls between two presents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresentedOverlay {
    pub rects: usize,
    pub points: usize,
    pub labels: Vec<String>,
}

struct Recording {
    size: Size,
    calls: Vec<DrawCall>,
}

/// Surface that records every call. Clones share the recording.
#[derive(Clone)]
pub struct RecordingSurface {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSurface {
    pub fn new(size: Size) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Recording {
                size,
                calls: Vec::new(),
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recording) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn calls(&self) -> Vec<DrawCall> {
        self.with(|r| r.calls.clone())
    }

    pub fn rects(&self) -> Vec<DisplayRect> {
        self.with(|r| {
            r.calls
                .iter()
                .filter_map(|c| match c {
                    DrawCall::Rect(rect) => Some(*rect),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn labels(&self) -> Vec<String> {
        self.with(|r| {
            r.calls
                .iter()
                .filter_map(|c| match c {
                    DrawCall::Text(text, _) => Some(text.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn presents(&self) -> usize {
        self.with(|r| r.calls.iter().filter(|c| **c == DrawCall::Present).count())
    }

    /// Number of draw calls (rects, points, text, presents) recorded so far.
    pub fn draw_count(&self) -> usize {
        self.with(|r| {
            r.calls
                .iter()
                .filter(|c| !matches!(c, DrawCall::Clear | DrawCall::Resize(_)))
                .count()
        })
    }

    /// One entry per present, in order.
    pub fn overlays(&self) -> Vec<PresentedOverlay> {
        self.with(|r| {
            let mut overlays = Vec::new();
            let mut current = PresentedOverlay::default();
            for call in &r.calls {
                match call {
                    DrawCall::Clear => current = PresentedOverlay::default(),
                    DrawCall::Rect(_) => current.rects += 1,
                    DrawCall::Point(_) => current.points += 1,
                    DrawCall::Text(text, _) => current.labels.push(text.clone()),
                    DrawCall::Present => overlays.push(std::mem::take(&mut current)),
                    DrawCall::Resize(_) => {}
                }
            }
            overlays
        })
    }

    pub fn last_call(&self) -> Option<DrawCall> {
        self.with(|r| r.calls.last().cloned())
    }
}

impl DisplaySurface for RecordingSurface {
    fn size(&self) -> Size {
        self.with(|r| r.size)
    }

    fn resize(&mut self, size: Size) {
        self.with(|r| {
            r.size = size;
            r.calls.push(DrawCall::Resize(size));
        })
    }

    fn clear(&mut self) {
        self.with(|r| r.calls.push(DrawCall::Clear))
    }

    fn draw_rect(&mut self, rect: &DisplayRect, _stroke: &StrokeStyle) {
        let rect = *rect;
        self.with(|r| r.calls.push(DrawCall::Rect(rect)))
    }

    fn draw_point(&mut self, at: DisplayPoint, _radius: f64, _color: Color) {
        self.with(|r| r.calls.push(DrawCall::Point(at)))
    }

    fn draw_text(&mut self, text: &str, at: DisplayPoint, _color: Color) {
        let text = text.to_string();
        self.with(|r| r.calls.push(DrawCall::Text(text, at)))
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.with(|r| r.calls.push(DrawCall::Present));
        Ok(())
    }
}
