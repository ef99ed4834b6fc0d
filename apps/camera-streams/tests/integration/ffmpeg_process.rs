//! Drives the real ffmpeg process plumbing against a shell script that imitates ffmpeg:
//! it reports progress, writes the live playlist and finalizes its output on SIGINT.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;

use camera_streams::{
    manager::StreamSessionManager,
    supervisor::{FfmpegTranscoder, LiveOptions},
    Purpose, SessionState, StatusPublisher, StreamManagerError,
};

use super::common::{wait_for_release, TEST_SOURCE};

const FAKE_FFMPEG: &str = r##"#!/bin/sh
for last; do :; done
case "$last" in
    *fail*) echo "Connection refused" >&2; exit 1 ;;
esac
trap 'echo finalized > "$last"; exit 0' INT
case "$last" in
    *.m3u8) echo "#EXTM3U" > "$last" ;;
esac
echo "frame=1"
echo "progress=continue"
while :; do sleep 0.05; done
"##;

/// Written once per test binary, before any test spawns a child, so no forked child can
/// still hold it open for writing when it is executed.
fn fake_ffmpeg() -> &'static Path {
    static SCRIPT: OnceLock<PathBuf> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        let dir = tempfile::Builder::new()
            .prefix("fake-ffmpeg")
            .tempdir()
            .unwrap()
            .keep();
        let path = dir.join("ffmpeg");
        std::fs::write(&path, FAKE_FFMPEG).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    })
}

fn manager(temp: &TempDir, poll_interval_ms: u64) -> Arc<StreamSessionManager> {
    super::init_test_environment();
    let mut config = super::create_test_config(temp.path());
    config.transcoder.ffmpeg_path = fake_ffmpeg().to_path_buf();
    config.transcoder.readiness_timeout_ms = 3000;
    config.transcoder.readiness_poll_interval_ms = poll_interval_ms;

    Arc::new(StreamSessionManager::new(
        &config,
        Arc::new(FfmpegTranscoder::new()),
        StatusPublisher::new(),
        Handle::current(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_process_lifecycle() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, 20);

    let started = manager
        .start_live("cam1", TEST_SOURCE, &LiveOptions::default())
        .await
        .unwrap();
    assert_eq!(started.state, SessionState::Active);
    assert!(started.playlist_path.exists());
    assert!(manager.session_info("cam1", Purpose::Live).unwrap().pid.is_some());

    manager.stop_live("cam1").await.unwrap();
    assert!(!started.playlist_path.exists());
    assert!(wait_for_release(&manager, "cam1", Purpose::Live).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recording_is_finalized_on_stop() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, 20);
    let mut events = manager.publisher().subscribe();

    let started = manager.start_recording("cam1", TEST_SOURCE).await.unwrap();
    assert_eq!(started.state, SessionState::Active);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stopped = manager.stop_recording("cam1").await.unwrap();
    assert!(stopped.duration_seconds >= 0.2);
    assert!(wait_for_release(&manager, "cam1", Purpose::Recording).await);

    // SIGINT let the process write its trailer
    let contents = std::fs::read_to_string(&started.output_path).unwrap();
    assert_eq!(contents.trim(), "finalized");

    let states: Vec<_> = std::iter::from_fn(|| events.try_recv()).map(|e| e.status).collect();
    assert_eq!(
        states,
        vec![
            SessionState::Starting,
            SessionState::Active,
            SessionState::Stopping,
            SessionState::Stopped,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_early_exit_is_spawn_failure() {
    let temp = TempDir::new().unwrap();
    // Long enough that the liveness check cannot beat the exit
    let manager = manager(&temp, 1000);

    // The fake exits with status 1 when its output name mentions "fail"
    let err = manager
        .start_recording("fail-cam", TEST_SOURCE)
        .await
        .unwrap_err();
    match err {
        StreamManagerError::SpawnFailure(detail) => {
            assert!(detail.contains("Connection refused"), "{}", detail)
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(manager.sessions().is_empty());
}
