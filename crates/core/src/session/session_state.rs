use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::detection::domain::detected_face::DetectedFace;
use crate::overlay::domain::display_surface::DisplaySurface;
use crate::session::frame_detection_loop::{CycleReport, LoopPhase};

/// Lifecycle of one camera-to-surface session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed(String),
}

impl SessionState {
    /// `Starting` or `Running`: a loop is scheduled and a stream is held.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    CycleCompleted(CycleReport),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the session manager and its loop thread.
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    phase: Mutex<LoopPhase>,
    latest_faces: Mutex<Vec<DetectedFace>>,
    surface: Mutex<Option<Box<dyn DisplaySurface>>>,
    stream_open: AtomicBool,
    events: Sender<SessionEvent>,
}

impl SessionShared {
    pub(crate) fn new(event_capacity: usize) -> (Self, Receiver<SessionEvent>) {
        let (events, receiver) = crossbeam_channel::bounded(event_capacity.max(1));
        let shared = Self {
            state: Mutex::new(SessionState::Idle),
            phase: Mutex::new(LoopPhase::NotStarted),
            latest_faces: Mutex::new(Vec::new()),
            surface: Mutex::new(None),
            stream_open: AtomicBool::new(false),
            events,
        };
        (shared, receiver)
    }

    pub(crate) fn state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state == next {
            return;
        }
        log::info!("Session {} -> {}", *state, next);
        *state = next.clone();
        drop(state);
        self.emit(SessionEvent::StateChanged(next));
    }

    /// Moves to `next` only while the session is `Starting` or `Running`.
    /// Returns whether the transition happened.
    pub(crate) fn transition_if_active(&self, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if !state.is_active() || *state == next {
            return false;
        }
        log::info!("Session {} -> {}", *state, next);
        *state = next.clone();
        drop(state);
        self.emit(SessionEvent::StateChanged(next));
        true
    }

    pub(crate) fn phase(&self) -> LoopPhase {
        *lock(&self.phase)
    }

    pub(crate) fn set_phase(&self, phase: LoopPhase) {
        *lock(&self.phase) = phase;
    }

    pub(crate) fn latest_faces(&self) -> Vec<DetectedFace> {
        lock(&self.latest_faces).clone()
    }

    pub(crate) fn publish_faces(&self, faces: Vec<DetectedFace>) {
        *lock(&self.latest_faces) = faces;
    }

    pub(crate) fn bind_surface(&self, surface: Box<dyn DisplaySurface>) {
        *lock(&self.surface) = Some(surface);
    }

    pub(crate) fn take_surface(&self) -> Option<Box<dyn DisplaySurface>> {
        lock(&self.surface).take()
    }

    /// Runs `f` on the bound surface, if any.
    pub(crate) fn with_surface<R>(&self, f: impl FnOnce(&mut dyn DisplaySurface) -> R) -> Option<R> {
        let mut surface = lock(&self.surface);
        surface.as_mut().map(|s| f(s.as_mut()))
    }

    pub(crate) fn is_stream_open(&self) -> bool {
        self.stream_open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stream_open(&self, open: bool) {
        self.stream_open.store(open, Ordering::SeqCst);
    }

    /// Never blocks; events are dropped while the channel is full.
    pub(crate) fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => log::trace!("Session event channel full, dropping event"),
        }
    }
}
