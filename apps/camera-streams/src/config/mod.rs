use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::storage::validate_camera_id;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub transcoder: TranscoderConfig,
    pub live: LiveDefaults,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
    pub shutdown_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "camera-streams".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            shutdown_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub worker_threads: Option<usize>,
    /// Serve the HLS output directory under `/hls`.
    pub serve_hls: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            worker_threads: None,
            serve_hls: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub hls_root: PathBuf,
    pub recording_root: PathBuf,
    /// Public prefix under which `hls_root` is reachable by players.
    pub hls_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            hls_root: PathBuf::from("/tmp/hls"),
            recording_root: PathBuf::from("/tmp/recordings"),
            hls_base_url: "/hls".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub hls_time_seconds: u32,
    pub hls_list_size: u32,
    pub readiness_timeout_ms: u64,
    pub readiness_poll_interval_ms: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            hls_time_seconds: 2,
            hls_list_size: 5,
            readiness_timeout_ms: 3000,
            readiness_poll_interval_ms: 250,
        }
    }
}

impl TranscoderConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }
}

/// Encoder settings used by live sessions when a request leaves them unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveDefaults {
    pub codec: String,
    pub preset: String,
    pub bitrate: String,
    pub maxrate: String,
}

impl Default for LiveDefaults {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            bitrate: "2M".to_string(),
            maxrate: "2M".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    pub source_uri: String,
    pub enabled: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            source_uri: String::new(),
            enabled: true,
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api.port == 0 {
            return Err("API port must be greater than 0".to_string());
        }

        if self.transcoder.ffmpeg_path.as_os_str().is_empty() {
            return Err("transcoder.ffmpeg_path cannot be empty".to_string());
        }
        if self.transcoder.hls_time_seconds == 0 {
            return Err("transcoder.hls_time_seconds must be greater than 0".to_string());
        }
        if self.transcoder.hls_list_size == 0 {
            return Err("transcoder.hls_list_size must be greater than 0".to_string());
        }
        if self.transcoder.readiness_poll_interval_ms == 0 {
            return Err("transcoder.readiness_poll_interval_ms must be greater than 0".to_string());
        }
        if self.transcoder.readiness_poll_interval_ms > self.transcoder.readiness_timeout_ms {
            return Err(
                "transcoder.readiness_poll_interval_ms cannot exceed readiness_timeout_ms".to_string(),
            );
        }

        if self.storage.hls_root == self.storage.recording_root {
            return Err("storage.hls_root and storage.recording_root must differ".to_string());
        }

        let mut camera_ids = HashSet::new();
        for camera in &self.cameras {
            validate_camera_id(&camera.id).map_err(|e| e.to_string())?;
            if !camera_ids.insert(camera.id.as_str()) {
                return Err(format!("Duplicate camera ID: {}", camera.id));
            }
            if camera.source_uri.trim().is_empty() {
                return Err(format!("Camera {} has no source_uri", camera.id));
            }
        }

        Ok(())
    }

    pub async fn from_file(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(crate::StreamManagerError::ConfigError(format!(
                "Configuration file not found: {:?}\n\
                Please create a config.toml file or specify the path with --config",
                path
            )));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::StreamManagerError::ConfigError(format!(
                "Failed to read configuration file {:?}: {}",
                path, e
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            crate::StreamManagerError::ConfigError(format!(
                "Failed to parse configuration file {:?}: {}",
                path, e
            ))
        })?;

        config.validate().map_err(crate::StreamManagerError::ConfigError)?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.app.shutdown_timeout_seconds)
    }
}

/// Loads the configuration once at startup and hands out snapshots.
pub struct ConfigManager {
    config: Config,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Loads `config_path`. A missing file is tolerated only when `required` is false,
    /// in which case defaults are used.
    pub async fn new(config_path: PathBuf, required: bool) -> crate::Result<Self> {
        let config = if config_path.exists() || required {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(&config_path).await.map_err(|e| {
                error!("Failed to load configuration: {}", e);
                e
            })?
        } else {
            warn!("Configuration file {:?} not found, using defaults", config_path);
            Config::default()
        };

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Applies command line or environment overrides and re-validates.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> crate::Result<()> {
        let config = &mut self.config;
        if let Some(hls_path) = overrides.hls_path {
            config.storage.hls_root = hls_path;
        }
        if let Some(recording_path) = overrides.recording_path {
            config.storage.recording_root = recording_path;
        }
        if let Some(base_url) = overrides.hls_base_url {
            config.storage.hls_base_url = base_url;
        }
        if let Some(ffmpeg) = overrides.ffmpeg_path {
            config.transcoder.ffmpeg_path = ffmpeg;
        }
        if let Some(hls_time) = overrides.hls_time_seconds {
            config.transcoder.hls_time_seconds = hls_time;
        }
        if let Some(list_size) = overrides.hls_list_size {
            config.transcoder.hls_list_size = list_size;
        }
        if let Some((host, port)) = overrides.bind {
            config.api.host = host;
            config.api.port = port;
        }
        config.validate().map_err(crate::StreamManagerError::ConfigError)
    }

    pub fn into_inner(self) -> Config {
        self.config
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub hls_path: Option<PathBuf>,
    pub recording_path: Option<PathBuf>,
    pub hls_base_url: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub hls_time_seconds: Option<u32>,
    pub hls_list_size: Option<u32>,
    pub bind: Option<(String, u16)>,
}

/// Parses `host:port`.
pub fn parse_bind_address(bind: &str) -> crate::Result<(String, u16)> {
    let (host, port) = bind.rsplit_once(':').ok_or_else(|| {
        crate::StreamManagerError::ConfigError(format!("Bind address must be host:port, got {}", bind))
    })?;
    let port = port.parse::<u16>().map_err(|e| {
        crate::StreamManagerError::ConfigError(format!("Invalid port in bind address {}: {}", bind, e))
    })?;
    Ok((host.to_string(), port))
}
