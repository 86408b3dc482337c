use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::camera::domain::camera_provider::CameraStream;
use crate::detection::domain::detected_face::DetectedFace;
use crate::detection::domain::face_detector::FaceDetector;
use crate::overlay::domain::overlay_renderer::{OverlayRenderer, RenderError};
use crate::session::attribute_enricher::AttributeEnricher;
use crate::session::cycle_logger::CycleLogger;
use crate::session::session_config::{Pacing, SessionConfig};
use crate::session::session_state::{SessionEvent, SessionShared, SessionState};
use crate::shared::frame::Frame;
use crate::shared::geometry::Size;

/// Where the loop currently is, as published to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    NotStarted,
    Scheduled,
    Detecting,
    Enriching,
    Rendering,
    Cancelled,
}

/// Outcome of one detect → enrich → render pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    /// 1-based cycle number within the session.
    pub cycle: u64,
    pub frame_index: usize,
    pub faces: usize,
    pub detection_failed: bool,
    pub enriched: usize,
    pub enrichment_failures: usize,
    pub render_skipped: bool,
    pub detect_ms: f64,
    pub enrich_ms: f64,
    pub render_ms: f64,
}

/// Why the loop stopped scheduling cycles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The continue flag was cleared.
    Cancelled,
    /// The camera has no more frames.
    EndOfStream,
    /// A provider or the camera became unusable.
    Fatal(String),
}

/// Per-session detection scheduler.
///
/// Pulls one frame per cycle; a new cycle is admitted only after the
/// previous one has rendered, so a slow detector lowers the cycle rate
/// instead of queueing frames. The continue flag is checked before every
/// capture and again before detection; a cycle that has started always
/// runs to completion.
pub struct FrameDetectionLoop {
    detector: Arc<dyn FaceDetector>,
    enricher: Arc<AttributeEnricher>,
    renderer: OverlayRenderer,
    config: SessionConfig,
    logger: Box<dyn CycleLogger>,
    shared: Arc<SessionShared>,
    should_continue: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl FrameDetectionLoop {
    pub(crate) fn new(
        detector: Arc<dyn FaceDetector>,
        enricher: Arc<AttributeEnricher>,
        config: SessionConfig,
        logger: Box<dyn CycleLogger>,
        shared: Arc<SessionShared>,
        should_continue: Arc<AtomicBool>,
        wake: Receiver<()>,
    ) -> Self {
        Self {
            detector,
            enricher,
            renderer: OverlayRenderer::new(config.style.clone()),
            config,
            logger,
            shared,
            should_continue,
            wake,
        }
    }

    fn keep_going(&self) -> bool {
        self.should_continue.load(Ordering::Acquire)
    }

    /// Runs cycles until cancelled, the stream ends, or something fatal
    /// happens. The stream stays owned by the caller.
    pub fn run(mut self, stream: &mut dyn CameraStream) -> LoopExit {
        self.shared.set_phase(LoopPhase::Scheduled);
        let ticker = match self.config.pacing {
            Pacing::FixedInterval { interval_ms } => {
                Some(crossbeam_channel::tick(Duration::from_millis(interval_ms)))
            }
            Pacing::NextFrame => None,
        };

        let mut cycle = 0u64;
        let mut consecutive_failures = 0usize;
        let exit = loop {
            if !self.keep_going() {
                break LoopExit::Cancelled;
            }

            let frame = match stream.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) if !self.keep_going() => break LoopExit::Cancelled,
                Ok(None) => {
                    log::info!("Camera stream ended after {cycle} cycles");
                    break LoopExit::EndOfStream;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log::warn!(
                        "Capture failed ({consecutive_failures}/{}): {e}",
                        self.config.max_consecutive_capture_failures
                    );
                    if consecutive_failures >= self.config.max_consecutive_capture_failures {
                        break LoopExit::Fatal(e.to_string());
                    }
                    self.wait_for_admission(ticker.as_ref());
                    continue;
                }
            };

            if !self.keep_going() {
                break LoopExit::Cancelled;
            }
            if cycle == 0 {
                self.shared.transition_if_active(SessionState::Running);
            }
            cycle += 1;

            match self.run_cycle(cycle, frame) {
                Ok(report) => {
                    self.logger.progress(cycle, report.faces);
                    self.shared.emit(SessionEvent::CycleCompleted(report));
                }
                Err(reason) => break LoopExit::Fatal(reason),
            }

            self.wait_for_admission(ticker.as_ref());
        };

        self.shared.set_phase(LoopPhase::Cancelled);
        match &exit {
            LoopExit::Fatal(reason) => log::error!("Detection loop failed: {reason}"),
            other => log::debug!("Detection loop exited: {other:?}"),
        }
        self.logger.summary();
        exit
    }

    /// Blocks until the next tick, or returns at once when the session is
    /// being stopped. Next-frame pacing waits inside `next_frame` instead.
    fn wait_for_admission(&self, ticker: Option<&Receiver<Instant>>) {
        if let Some(ticker) = ticker {
            if !self.keep_going() {
                return;
            }
            crossbeam_channel::select! {
                recv(ticker) -> _ => {},
                recv(self.wake) -> _ => {},
            }
        }
    }

    /// One detect → enrich → render pass. `Err` carries a fatal reason.
    fn run_cycle(&mut self, cycle: u64, frame: Frame) -> Result<CycleReport, String> {
        let source = frame.size();
        let mut report = CycleReport {
            cycle,
            frame_index: frame.index(),
            ..CycleReport::default()
        };

        self.shared.set_phase(LoopPhase::Detecting);
        let t0 = Instant::now();
        let mut faces = match self.detector.detect(&frame) {
            Ok(faces) => faces,
            Err(e) if e.is_fatal() => return Err(e.to_string()),
            Err(e) => {
                log::warn!("Cycle {cycle}: {e}; clearing overlay");
                report.detection_failed = true;
                Vec::new()
            }
        };
        report.detect_ms = elapsed_ms(t0);
        report.faces = faces.len();
        self.logger.timing("detect", report.detect_ms);

        if self.enricher.is_enabled() && !faces.is_empty() {
            if self.config.provisional_render {
                self.shared.set_phase(LoopPhase::Rendering);
                self.render(&faces, source);
            }
            self.shared.set_phase(LoopPhase::Enriching);
            let t0 = Instant::now();
            let summary = self.enricher.enrich_all(&frame, &mut faces);
            report.enrich_ms = elapsed_ms(t0);
            report.enriched = summary.enriched;
            report.enrichment_failures = summary.failed;
            self.logger.timing("enrich", report.enrich_ms);
            self.logger
                .metric("live_crops", self.enricher.live_crops() as f64);
        }
        drop(frame);

        self.shared.set_phase(LoopPhase::Rendering);
        let t0 = Instant::now();
        report.render_skipped = !self.render(&faces, source);
        report.render_ms = elapsed_ms(t0);
        self.logger.timing("render", report.render_ms);
        self.logger.metric("faces", faces.len() as f64);

        self.shared.publish_faces(faces);
        self.shared.set_phase(LoopPhase::Scheduled);
        Ok(report)
    }

    /// Draws onto the bound surface. Returns false when nothing was presented.
    fn render(&self, faces: &[DetectedFace], source: Size) -> bool {
        let target = self.config.display_size.unwrap_or(source);
        let result = self.shared.with_surface(|surface| {
            if !target.is_empty() && surface.size() != target {
                surface.resize(target);
            }
            self.renderer.render(surface, faces, source)
        });
        match result {
            Some(Ok(_)) => true,
            Some(Err(RenderError::SurfaceUnavailable(size))) => {
                log::debug!("Render skipped: surface is {size}");
                false
            }
            Some(Err(e)) => {
                log::warn!("Render skipped: {e}");
                false
            }
            None => {
                log::trace!("Render skipped: no surface bound");
                false
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
