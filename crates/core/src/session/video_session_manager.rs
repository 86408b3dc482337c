use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::camera::domain::camera_provider::{CameraProvider, CameraStream, StreamInterrupt};
use crate::detection::domain::attribute_provider::AttributeProvider;
use crate::detection::domain::detected_face::DetectedFace;
use crate::detection::domain::face_detector::FaceDetector;
use crate::overlay::domain::display_surface::DisplaySurface;
use crate::session::attribute_enricher::AttributeEnricher;
use crate::session::cycle_logger::{CycleLogger, LogCycleLogger};
use crate::session::error::{ConfigError, SessionError};
use crate::session::frame_detection_loop::{FrameDetectionLoop, LoopExit, LoopPhase};
use crate::session::session_config::SessionConfig;
use crate::session::session_state::{SessionEvent, SessionShared, SessionState};

type LoggerFactory = Box<dyn Fn() -> Box<dyn CycleLogger> + Send + Sync>;

/// The running loop thread and the handles used to stop it.
struct LoopWorker {
    should_continue: Arc<AtomicBool>,
    wake: Sender<()>,
    interrupt: StreamInterrupt,
    handle: JoinHandle<LoopExit>,
}

/// Spawns a loop thread through `spawn` and hands it `stream` once the
/// thread exists. If spawning fails the stream goes back to `camera`.
fn launch<S, B>(
    spawn: S,
    camera: &Arc<dyn CameraProvider>,
    stream: Box<dyn CameraStream>,
    body: B,
) -> std::io::Result<JoinHandle<LoopExit>>
where
    S: FnOnce(Box<dyn FnOnce() -> LoopExit + Send>) -> std::io::Result<JoinHandle<LoopExit>>,
    B: FnOnce(Box<dyn CameraStream>) -> LoopExit + Send + 'static,
{
    let (handover, received) = crossbeam_channel::bounded::<Box<dyn CameraStream>>(1);
    let spawned = spawn(Box::new(move || match received.recv() {
        Ok(stream) => body(stream),
        Err(_) => LoopExit::Cancelled,
    }));
    match spawned {
        Ok(handle) => {
            if let Err(crossbeam_channel::SendError(stream)) = handover.send(stream) {
                camera.release(stream);
            }
            Ok(handle)
        }
        Err(e) => {
            camera.release(stream);
            Err(e)
        }
    }
}

/// Owns one camera-to-surface session.
///
/// The camera stream is acquired on [`start`](Self::start) and handed to a
/// dedicated loop thread, which gives it back to the camera provider when
/// the loop exits. At most one loop thread exists per manager, and a new
/// stream is only acquired after the previous loop has been joined.
/// Dropping the manager stops the session.
pub struct VideoSessionManager {
    camera: Arc<dyn CameraProvider>,
    detector: Arc<dyn FaceDetector>,
    enricher: Arc<AttributeEnricher>,
    config: SessionConfig,
    make_logger: LoggerFactory,
    shared: Arc<SessionShared>,
    events: Receiver<SessionEvent>,
    worker: Option<LoopWorker>,
}

impl VideoSessionManager {
    pub fn new(
        camera: Arc<dyn CameraProvider>,
        detector: Arc<dyn FaceDetector>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_attribute_providers(camera, detector, Vec::new(), config)
    }

    pub fn with_attribute_providers(
        camera: Arc<dyn CameraProvider>,
        detector: Arc<dyn FaceDetector>,
        providers: Vec<Arc<dyn AttributeProvider>>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (shared, events) = SessionShared::new(config.event_capacity);
        let throttle = config.log_throttle_cycles;
        Ok(Self {
            camera,
            detector,
            enricher: Arc::new(AttributeEnricher::new(providers, config.enrichment)),
            config,
            make_logger: Box::new(move || Box::new(LogCycleLogger::new(throttle))),
            shared: Arc::new(shared),
            events,
            worker: None,
        })
    }

    /// Replaces the per-run cycle logger (default: [`LogCycleLogger`]).
    pub fn with_cycle_logger<F>(mut self, make_logger: F) -> Self
    where
        F: Fn() -> Box<dyn CycleLogger> + Send + Sync + 'static,
    {
        self.make_logger = Box::new(make_logger);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn loop_phase(&self) -> LoopPhase {
        self.shared.phase()
    }

    pub fn is_stream_open(&self) -> bool {
        self.shared.is_stream_open()
    }

    /// Faces of the most recent completed cycle.
    pub fn latest_faces(&self) -> Vec<DetectedFace> {
        self.shared.latest_faces()
    }

    /// Face crops currently held by enrichment.
    pub fn live_crops(&self) -> usize {
        self.enricher.live_crops()
    }

    /// State changes and cycle reports. Events are dropped while the
    /// channel is full.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.clone()
    }

    /// Sets the surface overlays are drawn on, replacing any previous one.
    pub fn bind_surface(&self, surface: Box<dyn DisplaySurface>) {
        self.shared.bind_surface(surface);
    }

    pub fn unbind_surface(&self) -> Option<Box<dyn DisplaySurface>> {
        self.shared.take_surface()
    }

    /// Acquires the camera and starts the detection loop.
    ///
    /// No-op while starting or running. The session becomes `Running` once
    /// the first frame has arrived. An acquisition failure leaves the session
    /// `Failed` and is returned.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.shared.state().is_active() {
            log::debug!("start() ignored: session is {}", self.shared.state());
            return Ok(());
        }
        // A loop that ended on its own (end of stream, fatal error) is
        // reaped before a new stream is opened.
        if let Some(worker) = self.worker.take() {
            self.finish(worker);
        }

        self.shared.set_state(SessionState::Starting);
        let stream = match self.camera.acquire() {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Camera acquisition failed: {e}");
                self.shared.set_state(SessionState::Failed(e.to_string()));
                return Err(e.into());
            }
        };
        self.shared.set_stream_open(true);
        let interrupt = stream.interrupt_handle();

        let should_continue = Arc::new(AtomicBool::new(true));
        let (wake, wake_rx) = crossbeam_channel::bounded(0);
        let detection_loop = FrameDetectionLoop::new(
            Arc::clone(&self.detector),
            Arc::clone(&self.enricher),
            self.config.clone(),
            (self.make_logger)(),
            Arc::clone(&self.shared),
            Arc::clone(&should_continue),
            wake_rx,
        );
        let camera = Arc::clone(&self.camera);
        let shared = Arc::clone(&self.shared);

        let spawned = launch(
            |body| {
                std::thread::Builder::new()
                    .name("face-detection-loop".into())
                    .spawn(body)
            },
            &self.camera,
            stream,
            move |mut stream| {
                let exit = detection_loop.run(stream.as_mut());
                camera.release(stream);
                shared.set_stream_open(false);
                match &exit {
                    LoopExit::EndOfStream => {
                        shared.transition_if_active(SessionState::Idle);
                    }
                    LoopExit::Fatal(reason) => {
                        shared.transition_if_active(SessionState::Failed(reason.clone()));
                    }
                    LoopExit::Cancelled => {}
                }
                exit
            },
        );

        match spawned {
            Ok(handle) => {
                self.worker = Some(LoopWorker {
                    should_continue,
                    wake,
                    interrupt,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                log::error!("Could not start detection loop thread: {e}");
                self.shared.set_stream_open(false);
                self.shared.set_state(SessionState::Failed(e.to_string()));
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Stops the loop, releases the stream and clears the surface.
    ///
    /// A cycle already in progress is allowed to finish; no cycle starts
    /// afterwards. Returns once the stream has been released. No-op when
    /// nothing is running; a `Failed` session stays `Failed`.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.shared.state().is_active() {
            self.shared.set_state(SessionState::Stopping);
        }
        self.finish(worker);
    }

    /// `stop()` when running, otherwise `start()`.
    pub fn toggle(&mut self) -> Result<(), SessionError> {
        if self.shared.state() == SessionState::Running {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    /// Cancels and joins `worker`, then settles the session state.
    fn finish(&mut self, worker: LoopWorker) {
        let LoopWorker {
            should_continue,
            wake,
            interrupt,
            handle,
        } = worker;
        should_continue.store(false, Ordering::Release);
        // A loop still waiting for its first frame is blocked in the stream.
        interrupt();
        drop(wake);

        let exit = handle.join().unwrap_or_else(|_| {
            log::error!("Detection loop thread panicked");
            LoopExit::Fatal("detection loop panicked".into())
        });
        self.shared.set_stream_open(false);
        self.shared.with_surface(|surface| surface.clear());
        self.shared.publish_faces(Vec::new());

        match (self.shared.state(), exit) {
            (SessionState::Failed(_), _) => {}
            (_, LoopExit::Fatal(reason)) => self.shared.set_state(SessionState::Failed(reason)),
            _ => self.shared.set_state(SessionState::Idle),
        }
    }
}

impl Drop for VideoSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
