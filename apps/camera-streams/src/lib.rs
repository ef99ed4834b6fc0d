pub mod config;
pub mod storage;
pub mod status;
pub mod session;
pub mod supervisor;
pub mod camera;
pub mod manager;
pub mod api;
pub mod service;

// Re-export commonly used types
pub use config::{Config, ConfigManager};
pub use manager::StreamSessionManager;
pub use session::{Purpose, SessionState};
pub use status::{StatusEvent, StatusPublisher};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamManagerError {
    #[error("{purpose} session already active for camera {camera_id}")]
    AlreadyActive { camera_id: String, purpose: Purpose },

    #[error("no active {purpose} session for camera {camera_id}")]
    NotFound { camera_id: String, purpose: Purpose },

    #[error("Failed to launch transcoder: {0}")]
    SpawnFailure(String),

    #[error("Filesystem error at {path:?}: {source}")]
    FilesystemError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid camera id: {0}")]
    InvalidCameraId(String),

    #[error("Invalid stream options: {0}")]
    InvalidOptions(String),

    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Recording not found: {0}")]
    RecordingNotFound(String),

    #[error("Recording is still being written: {0}")]
    RecordingInProgress(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StreamManagerError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemError {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamManagerError>;
