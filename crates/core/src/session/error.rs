use thiserror::Error;

use crate::camera::domain::camera_provider::CameraError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to acquire camera: {0}")]
    Acquisition(#[from] CameraError),
    #[error("failed to spawn detection loop: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
