use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use face_overlay_core::camera::domain::camera_provider::CameraProvider;
use face_overlay_core::camera::infrastructure::ffmpeg_camera::FfmpegCamera;
use face_overlay_core::camera::infrastructure::image_sequence_camera::ImageSequenceCamera;
use face_overlay_core::detection::domain::attribute_provider::AttributeProvider;
use face_overlay_core::detection::domain::face_detector::FaceDetector;
use face_overlay_core::detection::infrastructure::onnx_age_gender_provider::OnnxAgeGenderProvider;
use face_overlay_core::detection::infrastructure::onnx_blazeface_detector::OnnxBlazefaceDetector;
use face_overlay_core::detection::infrastructure::onnx_descriptor_provider::OnnxDescriptorProvider;
use face_overlay_core::detection::infrastructure::onnx_expression_provider::OnnxExpressionProvider;
use face_overlay_core::overlay::infrastructure::raster_surface::RasterSurface;
use face_overlay_core::session::session_config::{EnrichmentMode, Pacing, SessionConfig};
use face_overlay_core::session::session_state::{SessionEvent, SessionState};
use face_overlay_core::session::video_session_manager::VideoSessionManager;
use face_overlay_core::shared::geometry::Size;

/// Live face detection with box, landmark and attribute overlays.
#[derive(Parser)]
#[command(name = "face-overlay")]
struct Cli {
    /// Camera device, stream URL or video file (e.g. /dev/video0).
    source: Option<String>,

    /// Input device format passed to ffmpeg (v4l2, avfoundation, dshow).
    #[arg(long)]
    format: Option<String>,

    /// Extra ffmpeg input option as KEY=VALUE (repeatable).
    #[arg(long = "camera-option", value_name = "KEY=VALUE")]
    camera_options: Vec<String>,

    /// Replay a directory of images instead of opening a camera.
    #[arg(long, conflicts_with = "source")]
    frames_dir: Option<PathBuf>,

    /// Restart the image sequence after the last file.
    #[arg(long, requires = "frames_dir")]
    loop_frames: bool,

    /// BlazeFace ONNX model.
    #[arg(long)]
    detector_model: PathBuf,

    /// Age/gender ONNX model (enables age and gender labels).
    #[arg(long)]
    age_gender_model: Option<PathBuf>,

    /// Expression ONNX model (enables expression labels).
    #[arg(long)]
    expression_model: Option<PathBuf>,

    /// Face recognition ONNX model (attaches an identity descriptor to each face).
    #[arg(long)]
    descriptor_model: Option<PathBuf>,

    /// List every expression scoring at least this much (0.0-1.0) instead
    /// of only the dominant one.
    #[arg(long)]
    min_expression_confidence: Option<f32>,

    /// TrueType/OpenType font for labels (default: a common system font).
    #[arg(long)]
    font: Option<PathBuf>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value = "0.5")]
    confidence: f64,

    /// Milliseconds between detection cycles.
    #[arg(long, conflicts_with = "next_frame")]
    interval_ms: Option<u64>,

    /// Run a cycle for every frame the camera delivers.
    #[arg(long)]
    next_frame: bool,

    /// Overlay size as WIDTHxHEIGHT (default: frame size).
    #[arg(long)]
    display: Option<Size>,

    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Write every overlay as a PNG into this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Enrich faces one after another instead of in parallel.
    #[arg(long)]
    sequential_enrichment: bool,

    /// Draw boxes before attributes are ready, then redraw with labels.
    #[arg(long)]
    provisional_render: bool,

    /// JSON session config; flags given on the command line override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = build_config(&cli)?;
    let camera = build_camera(&cli)?;
    let detector: Arc<dyn FaceDetector> =
        Arc::new(OnnxBlazefaceDetector::new(&cli.detector_model, cli.confidence)?);
    let providers = build_providers(&cli)?;

    let initial_size = config.display_size.unwrap_or_default();
    let mut surface = match &cli.font {
        Some(path) => RasterSurface::new(initial_size).with_font(path)?,
        None => RasterSurface::new(initial_size).with_system_font(),
    };
    if let Some(dir) = &cli.snapshot_dir {
        surface = surface.with_snapshot_dir(dir)?;
    }

    let mut session =
        VideoSessionManager::with_attribute_providers(camera, detector, providers, config)?;
    session.bind_surface(Box::new(surface));
    let events = session.events();

    session.start()?;
    let tally = drain_events(&events, cli.max_cycles, || session.state());
    session.stop();

    log::info!(
        "{} cycles, {} faces, {} detection failures, {} skipped renders",
        tally.cycles,
        tally.faces,
        tally.detection_failures,
        tally.skipped_renders
    );
    if let Some(dir) = &cli.snapshot_dir {
        log::info!("Overlays written to {}", dir.display());
    }

    match session.state() {
        SessionState::Failed(reason) => Err(reason.into()),
        _ => Ok(()),
    }
}

#[derive(Default)]
struct Tally {
    cycles: u64,
    faces: usize,
    detection_failures: usize,
    skipped_renders: usize,
}

/// How long to wait for an event before checking the session state.
const EVENT_POLL: Duration = Duration::from_millis(200);

/// Consumes session events until `max_cycles` cycles completed or the
/// session stops on its own.
///
/// Events are dropped when the channel is full, so the final state change
/// may never arrive; `state` is checked whenever no event came in time.
fn drain_events(
    events: &crossbeam_channel::Receiver<SessionEvent>,
    max_cycles: Option<u64>,
    state: impl Fn() -> SessionState,
) -> Tally {
    let mut tally = Tally::default();
    loop {
        let event = match events.recv_timeout(EVENT_POLL) {
            Ok(event) => event,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => match state() {
                SessionState::Failed(reason) => {
                    log::error!("Session failed: {reason}");
                    break;
                }
                s if !s.is_active() => break,
                _ => continue,
            },
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };
        match event {
            SessionEvent::CycleCompleted(report) => {
                tally.cycles = report.cycle;
                tally.faces += report.faces;
                tally.detection_failures += usize::from(report.detection_failed);
                tally.skipped_renders += usize::from(report.render_skipped);
                if max_cycles.is_some_and(|max| report.cycle >= max) {
                    break;
                }
            }
            SessionEvent::StateChanged(SessionState::Idle) => break,
            SessionEvent::StateChanged(SessionState::Failed(reason)) => {
                log::error!("Session failed: {reason}");
                break;
            }
            SessionEvent::StateChanged(state) => log::debug!("Session is {state}"),
        }
    }
    tally
}

fn build_config(cli: &Cli) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(interval_ms) = cli.interval_ms {
        config.pacing = Pacing::FixedInterval { interval_ms };
    }
    if cli.next_frame {
        config.pacing = Pacing::NextFrame;
    }
    if cli.display.is_some() {
        config.display_size = cli.display;
    }
    if cli.sequential_enrichment {
        config.enrichment = EnrichmentMode::Sequential;
    }
    if cli.provisional_render {
        config.provisional_render = true;
    }
    if cli.min_expression_confidence.is_some() {
        config.style.min_expression_confidence = cli.min_expression_confidence;
    }
    config.validate()?;
    Ok(config)
}

fn build_camera(cli: &Cli) -> Result<Arc<dyn CameraProvider>, Box<dyn std::error::Error>> {
    if let Some(dir) = &cli.frames_dir {
        let camera = ImageSequenceCamera::from_dir(dir)?.looping(cli.loop_frames);
        log::info!("Replaying {} images from {}", camera.len(), dir.display());
        return Ok(Arc::new(camera));
    }

    let source = cli
        .source
        .as_deref()
        .ok_or("A camera source or --frames-dir is required")?;
    let mut camera = FfmpegCamera::new(source);
    if let Some(format) = &cli.format {
        camera = camera.with_format(format);
    }
    for option in &cli.camera_options {
        let (key, value) = parse_option(option)?;
        camera = camera.with_option(key, value);
    }
    Ok(Arc::new(camera))
}

fn build_providers(
    cli: &Cli,
) -> Result<Vec<Arc<dyn AttributeProvider>>, Box<dyn std::error::Error>> {
    let mut providers: Vec<Arc<dyn AttributeProvider>> = Vec::new();
    if let Some(path) = &cli.age_gender_model {
        providers.push(Arc::new(OnnxAgeGenderProvider::new(path)?));
    }
    if let Some(path) = &cli.expression_model {
        providers.push(Arc::new(OnnxExpressionProvider::new(path)?));
    }
    if let Some(path) = &cli.descriptor_model {
        providers.push(Arc::new(OnnxDescriptorProvider::new(path)?));
    }
    Ok(providers)
}

fn parse_option(option: &str) -> Result<(&str, &str), String> {
    option
        .split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("Camera option must be KEY=VALUE, got '{option}'"))
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.source.is_none() && cli.frames_dir.is_none() {
        return Err("A camera source or --frames-dir is required".into());
    }
    if let Some(dir) = &cli.frames_dir {
        if !dir.is_dir() {
            return Err(format!("Frames directory not found: {}", dir.display()).into());
        }
    }
    if !cli.detector_model.exists() {
        return Err(format!(
            "Detector model not found: {}",
            cli.detector_model.display()
        )
        .into());
    }
    for path in [
        &cli.age_gender_model,
        &cli.expression_model,
        &cli.descriptor_model,
    ]
    .into_iter()
        .flatten()
    {
        if !path.exists() {
            return Err(format!("Model not found: {}", path.display()).into());
        }
    }
    if let Some(font) = &cli.font {
        if !font.is_file() {
            return Err(format!("Font not found: {}", font.display()).into());
        }
    }
    if let Some(config) = &cli.config {
        if !config.exists() {
            return Err(format!("Config file not found: {}", config.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if cli.interval_ms == Some(0) {
        return Err("Interval must be greater than 0 ms".into());
    }
    if cli.display.is_some_and(|d| d.is_empty()) {
        return Err("Display size must be non-zero in both dimensions".into());
    }
    if cli.max_cycles == Some(0) {
        return Err("Max cycles must be at least 1".into());
    }
    for option in &cli.camera_options {
        parse_option(option)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(parse_option("video_size=640x480").unwrap(), ("video_size", "640x480"));
        assert!(parse_option("framerate").is_err());
        assert!(parse_option("=30").is_err());
    }

    #[test]
    fn test_display_flag_parses_size() {
        let cli = parse(&["face-overlay", "/dev/video0", "--detector-model", "m.onnx", "--display", "320x240"]);
        assert_eq!(cli.display, Some(Size::new(320, 240)));
    }

    #[test]
    fn test_flags_override_config_defaults() {
        let cli = parse(&[
            "face-overlay",
            "/dev/video0",
            "--detector-model",
            "m.onnx",
            "--next-frame",
            "--sequential-enrichment",
            "--provisional-render",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.pacing, Pacing::NextFrame);
        assert_eq!(config.enrichment, EnrichmentMode::Sequential);
        assert!(config.provisional_render);
    }

    #[test]
    fn test_interval_and_next_frame_conflict() {
        let result = Cli::try_parse_from([
            "face-overlay",
            "/dev/video0",
            "--detector-model",
            "m.onnx",
            "--interval-ms",
            "50",
            "--next-frame",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_a_source() {
        let cli = parse(&["face-overlay", "--detector-model", "m.onnx"]);
        let err = validate(&cli).unwrap_err();
        assert!(err.to_string().contains("--frames-dir"));
    }

    #[test]
    fn test_validate_rejects_missing_model() {
        let cli = parse(&["face-overlay", "/dev/video0", "--detector-model", "/nonexistent/m.onnx"]);
        let err = validate(&cli).unwrap_err();
        assert!(err.to_string().contains("Detector model not found"));
    }

    #[test]
    fn test_drain_stops_at_max_cycles() {
        use face_overlay_core::session::frame_detection_loop::CycleReport;

        let (tx, rx) = crossbeam_channel::unbounded();
        for cycle in 1..=5 {
            tx.send(SessionEvent::CycleCompleted(CycleReport {
                cycle,
                faces: 2,
                detection_failed: cycle == 2,
                ..CycleReport::default()
            }))
            .unwrap();
        }
        let tally = drain_events(&rx, Some(3), || SessionState::Running);
        assert_eq!(tally.cycles, 3);
        assert_eq!(tally.faces, 6);
        assert_eq!(tally.detection_failures, 1);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_drain_stops_when_session_ends() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(SessionEvent::StateChanged(SessionState::Running)).unwrap();
        tx.send(SessionEvent::StateChanged(SessionState::Idle)).unwrap();
        drop(tx);
        let tally = drain_events(&rx, None, || SessionState::Running);
        assert_eq!(tally.cycles, 0);
    }

    #[test]
    fn test_drain_returns_when_final_state_event_is_lost() {
        use face_overlay_core::session::frame_detection_loop::CycleReport;

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(SessionEvent::CycleCompleted(CycleReport {
            cycle: 1,
            faces: 1,
            ..CycleReport::default()
        }))
        .unwrap();
        // Sender stays alive and no Idle event ever arrives.
        let tally = drain_events(&rx, None, || SessionState::Idle);
        assert_eq!(tally.cycles, 1);
        drop(tx);
    }

    #[test]
    fn test_drain_returns_when_session_failed_silently() {
        let (_tx, rx) = crossbeam_channel::unbounded::<SessionEvent>();
        let tally = drain_events(&rx, None, || SessionState::Failed("camera lost".into()));
        assert_eq!(tally.cycles, 0);
    }

    #[test]
    fn test_descriptor_and_expression_flags() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let cli = parse(&[
            "face-overlay",
            "/dev/video0",
            "--detector-model",
            model.path().to_str().unwrap(),
            "--descriptor-model",
            "/nonexistent/facenet.onnx",
            "--min-expression-confidence",
            "0.2",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.style.min_expression_confidence, Some(0.2));
        let err = validate(&cli).unwrap_err();
        assert!(err.to_string().contains("facenet.onnx"));
    }

    #[test]
    fn test_validate_rejects_missing_font() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let cli = parse(&[
            "face-overlay",
            "/dev/video0",
            "--detector-model",
            model.path().to_str().unwrap(),
            "--font",
            "/nonexistent/font.ttf",
        ]);
        let err = validate(&cli).unwrap_err();
        assert!(err.to_string().contains("Font not found"));
    }
}
