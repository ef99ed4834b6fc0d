//! Filesystem layout for live segment output and recordings.
//!
//! ```text
//! <hls_root>/<camera_id>/index.m3u8
//! <hls_root>/<camera_id>/segment_%03d.ts
//! <recording_root>/<camera_id>_<YYYY-MM-DDTHH-MM-SS-mmmZ>.mp4
//! ```

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::{Result, StreamManagerError};

pub mod archive;

pub use archive::RecordingFile;

pub const PLAYLIST_NAME: &str = "index.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";
pub const RECORDING_EXTENSION: &str = "mp4";

const MAX_CAMERA_ID_LEN: usize = 128;

/// Camera ids end up as path components, so only a conservative character set is accepted.
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    let valid = !camera_id.is_empty()
        && camera_id.len() <= MAX_CAMERA_ID_LEN
        && camera_id != "."
        && camera_id != ".."
        && camera_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StreamManagerError::InvalidCameraId(camera_id.to_string()))
    }
}

/// `cam1` at 2024-01-02T03:04:05.678Z becomes `cam1_2024-01-02T03-04-05-678Z.mp4`.
pub fn recording_file_name(camera_id: &str, at: DateTime<Utc>) -> String {
    let stamp = at
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace([':', '.'], "-");
    format!("{}_{}.{}", camera_id, stamp, RECORDING_EXTENSION)
}

/// Paths prepared for one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveOutput {
    pub directory: PathBuf,
    pub playlist: PathBuf,
    pub segment_pattern: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DirectoryManager {
    hls_root: PathBuf,
    recording_root: PathBuf,
    hls_base_url: String,
}

impl DirectoryManager {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            hls_root: storage.hls_root.clone(),
            recording_root: storage.recording_root.clone(),
            hls_base_url: storage.hls_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn hls_root(&self) -> &Path {
        &self.hls_root
    }

    pub fn recording_root(&self) -> &Path {
        &self.recording_root
    }

    /// Creates `path` and any missing parents. Succeeds if it already exists.
    pub async fn ensure(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StreamManagerError::filesystem(path, e))?;
        debug!(path = %path.display(), "Directory ensured");
        Ok(())
    }

    pub async fn ensure_roots(&self) -> Result<()> {
        self.ensure(&self.hls_root).await?;
        self.ensure(&self.recording_root).await?;
        info!(
            hls_root = %self.hls_root.display(),
            recording_root = %self.recording_root.display(),
            "Storage roots ready"
        );
        Ok(())
    }

    pub fn live_dir(&self, camera_id: &str) -> PathBuf {
        self.hls_root.join(camera_id)
    }

    pub fn playlist_path(&self, camera_id: &str) -> PathBuf {
        self.live_dir(camera_id).join(PLAYLIST_NAME)
    }

    /// Paths a live session for `camera_id` writes to. Touches nothing on disk.
    pub fn live_output(&self, camera_id: &str) -> LiveOutput {
        let directory = self.live_dir(camera_id);
        LiveOutput {
            playlist: directory.join(PLAYLIST_NAME),
            segment_pattern: directory.join(SEGMENT_PATTERN),
            directory,
        }
    }

    pub fn hls_url(&self, camera_id: &str) -> String {
        format!("{}/{}/{}", self.hls_base_url, camera_id, PLAYLIST_NAME)
    }

    pub fn recording_path(&self, camera_id: &str, at: DateTime<Utc>) -> PathBuf {
        self.recording_root.join(recording_file_name(camera_id, at))
    }

    /// Clears anything a previous run left behind for this camera and creates a fresh
    /// live directory.
    pub async fn prepare_live_output(&self, camera_id: &str) -> Result<LiveOutput> {
        validate_camera_id(camera_id)?;
        if self.purge_live_output(camera_id).await? {
            warn!(camera_id, "Removed stale live output from a previous session");
        }

        let output = self.live_output(camera_id);
        self.ensure(&output.directory).await?;
        Ok(output)
    }

    pub async fn prepare_recording_output(
        &self,
        camera_id: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        validate_camera_id(camera_id)?;
        self.ensure(&self.recording_root).await?;
        Ok(self.recording_path(camera_id, at))
    }

    /// Removes the whole live directory of a camera. Returns `false` if there was nothing
    /// to remove. Recording output is never touched here.
    pub async fn purge_live_output(&self, camera_id: &str) -> Result<bool> {
        validate_camera_id(camera_id)?;
        let directory = self.live_dir(camera_id);
        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => {
                debug!(camera_id, path = %directory.display(), "Purged live output");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StreamManagerError::filesystem(directory, e)),
        }
    }
}
