pub mod common;
pub mod session_manager;
#[cfg(unix)]
pub mod ffmpeg_process;

use camera_streams::config::StorageConfig;
use camera_streams::Config;
use std::path::Path;

pub fn init_test_environment() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn create_test_config(root: &Path) -> Config {
    let mut config = Config::default();

    config.api.host = "127.0.0.1".to_string();
    config.storage = StorageConfig {
        hls_root: root.join("hls"),
        recording_root: root.join("recordings"),
        hls_base_url: "/hls".to_string(),
    };
    config.transcoder.readiness_timeout_ms = 500;
    config.transcoder.readiness_poll_interval_ms = 10;
    config.app.shutdown_timeout_seconds = 2;

    config
}
