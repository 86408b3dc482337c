/// Fixed-interval pacing used when no interval is configured (10 cycles/s).
pub const DEFAULT_CYCLE_INTERVAL_MS: u64 = 100;

/// Index order of the gender output of the age/gender model.
pub const GENDER_LABELS: &[&str] = &["Male", "Female"];

/// Label used when the gender output does not index into [`GENDER_LABELS`].
pub const UNKNOWN_GENDER: &str = "unknown";

/// Output order of the seven-class face expression model.
pub const EXPRESSION_LABELS: &[&str] = &[
    "neutral",
    "happy",
    "sad",
    "angry",
    "fearful",
    "disgusted",
    "surprised",
];

/// Consecutive camera read errors tolerated before the session fails.
pub const DEFAULT_MAX_CAPTURE_FAILURES: usize = 5;

/// Session events buffered for a slow consumer before new ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
