use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{DirectoryManager, RECORDING_EXTENSION};
use crate::{Result, StreamManagerError};

/// A finished (or in-progress) recording found under the recording root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFile {
    pub file_name: String,
    pub camera_id: Option<String>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Recording file names are plain `<camera>_<stamp>.mp4` names, never paths.
pub fn validate_recording_file_name(file_name: &str) -> Result<()> {
    let has_extension = file_name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext == RECORDING_EXTENSION);

    if has_extension
        && !file_name.contains(['/', '\\'])
        && !file_name.starts_with('.')
    {
        Ok(())
    } else {
        Err(StreamManagerError::InvalidOptions(format!(
            "invalid recording file name: {}",
            file_name
        )))
    }
}

fn camera_of(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(RECORDING_EXTENSION)?.strip_suffix('.')?;
    stem.rsplit_once('_').map(|(camera, _)| camera.to_string())
}

impl DirectoryManager {
    /// Lists recordings, newest first.
    pub async fn list_recordings(&self) -> Result<Vec<RecordingFile>> {
        let root = self.recording_root();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StreamManagerError::filesystem(root, e)),
        };

        let mut recordings = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StreamManagerError::filesystem(root, e))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if validate_recording_file_name(&file_name).is_err() {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %file_name, "Skipping unreadable recording: {}", e);
                    continue;
                }
            };

            recordings.push(RecordingFile {
                camera_id: camera_of(&file_name),
                path: entry.path(),
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                file_name,
            });
        }

        recordings.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(recordings)
    }

    /// Deletes a single recording by file name.
    pub async fn delete_recording(&self, file_name: &str) -> Result<PathBuf> {
        validate_recording_file_name(file_name)?;
        let path = self.recording_root().join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Recording deleted");
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StreamManagerError::RecordingNotFound(file_name.to_string()))
            }
            Err(e) => Err(StreamManagerError::filesystem(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::TempDir;

    fn test_directories(temp: &TempDir) -> DirectoryManager {
        DirectoryManager::new(&StorageConfig {
            hls_root: temp.path().join("hls"),
            recording_root: temp.path().join("recordings"),
            ..Default::default()
        })
    }

    #[test]
    fn test_file_name_validation() {
        assert!(validate_recording_file_name("cam1_2024-01-02T03-04-05-678Z.mp4").is_ok());
        assert!(validate_recording_file_name("../cam1.mp4").is_err());
        assert!(validate_recording_file_name("cam1.mkv").is_err());
        assert!(validate_recording_file_name(".mp4").is_err());
        assert!(validate_recording_file_name("sub/cam1.mp4").is_err());
    }

    #[test]
    fn test_camera_of() {
        assert_eq!(
            camera_of("front_door_2024-01-02T03-04-05-678Z.mp4").as_deref(),
            Some("front_door")
        );
        assert_eq!(camera_of("nounderscore.mp4"), None);
    }

    #[tokio::test]
    async fn test_list_missing_root() {
        let temp = TempDir::new().unwrap();
        let dirs = test_directories(&temp);
        assert!(dirs.list_recordings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let temp = TempDir::new().unwrap();
        let dirs = test_directories(&temp);
        dirs.ensure_roots().await.unwrap();

        let root = dirs.recording_root().to_path_buf();
        std::fs::write(root.join("cam1_2024-01-02T03-04-05-678Z.mp4"), b"abc").unwrap();
        std::fs::write(root.join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(root.join("folder.mp4")).unwrap();

        let recordings = dirs.list_recordings().await.unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].camera_id.as_deref(), Some("cam1"));
        assert_eq!(recordings[0].size_bytes, 3);

        dirs.delete_recording("cam1_2024-01-02T03-04-05-678Z.mp4")
            .await
            .unwrap();
        assert!(dirs.list_recordings().await.unwrap().is_empty());

        let err = dirs
            .delete_recording("cam1_2024-01-02T03-04-05-678Z.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StreamManagerError::RecordingNotFound(_)));
    }
}
