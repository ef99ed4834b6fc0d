use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::info;

use camera_streams::{
    session::SessionKey,
    supervisor::{LiveOptions, TerminationMode},
    Purpose, SessionState, StreamManagerError,
};

use super::common::{TestFixture, TEST_SOURCE};

async fn start(fixture: &TestFixture, camera_id: &str, purpose: Purpose) -> camera_streams::Result<()> {
    match purpose {
        Purpose::Live => fixture
            .manager
            .start_live(camera_id, TEST_SOURCE, &LiveOptions::default())
            .await
            .map(|_| ()),
        Purpose::Recording => fixture
            .manager
            .start_recording(camera_id, TEST_SOURCE)
            .await
            .map(|_| ()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_yields_one_success() {
    let fixture = TestFixture::new();

    for purpose in [Purpose::Live, Purpose::Recording] {
        for camera in ["cam1", "cam2", "cam3"] {
            let a = {
                let manager = fixture.manager.clone();
                let camera = camera.to_string();
                tokio::spawn(async move {
                    match purpose {
                        Purpose::Live => manager
                            .start_live(&camera, TEST_SOURCE, &LiveOptions::default())
                            .await
                            .map(|_| ()),
                        Purpose::Recording => {
                            manager.start_recording(&camera, TEST_SOURCE).await.map(|_| ())
                        }
                    }
                })
            };
            let b = start(&fixture, camera, purpose).await;
            let a = a.await.unwrap();

            let successes = [a.is_ok(), b.is_ok()].into_iter().filter(|ok| *ok).count();
            assert_eq!(successes, 1, "{}/{}", camera, purpose);
            assert!(matches!(
                a.err().or(b.err()),
                Some(StreamManagerError::AlreadyActive { .. })
            ));
        }
    }

    assert_eq!(fixture.transcoder.spawned(), 6);
    assert_eq!(fixture.manager.list_active().len(), 6);
    fixture.manager.stop_all().await;
}

#[tokio::test]
async fn test_stop_without_session_has_no_side_effects() {
    let fixture = TestFixture::new();
    let mut events = fixture.manager.publisher().subscribe();

    let err = fixture.manager.stop_live("cam1").await.unwrap_err();
    assert!(matches!(
        err,
        StreamManagerError::NotFound { ref camera_id, purpose: Purpose::Live } if camera_id == "cam1"
    ));
    let err = fixture.manager.stop_recording("cam1").await.unwrap_err();
    assert!(matches!(err, StreamManagerError::NotFound { purpose: Purpose::Recording, .. }));

    assert!(fixture.manager.sessions().is_empty());
    assert!(!fixture.config.storage.hls_root.exists());
    assert!(!fixture.config.storage.recording_root.exists());
    assert!(events.try_recv().is_none());
    assert_eq!(fixture.transcoder.spawned(), 0);
}

#[tokio::test]
async fn test_stop_live_removes_output_directory() {
    let fixture = TestFixture::new();

    let started = fixture
        .manager
        .start_live("cam1", TEST_SOURCE, &LiveOptions::default())
        .await
        .unwrap();
    let live_dir = fixture.config.storage.hls_root.join("cam1");
    assert_eq!(started.playlist_path, live_dir.join("index.m3u8"));
    assert!(live_dir.is_dir());

    fixture.manager.stop_live("cam1").await.unwrap();
    assert!(!live_dir.exists());

    assert!(fixture.wait_for_release("cam1", Purpose::Live).await);
    assert!(!live_dir.exists());
}

#[tokio::test]
async fn test_recording_duration_tracks_wall_clock() {
    let fixture = TestFixture::new();

    let started = fixture.manager.start_recording("cam1", TEST_SOURCE).await.unwrap();
    assert_eq!(started.state, SessionState::Active);
    let since = Instant::now();

    sleep(Duration::from_millis(600)).await;
    let stopped = fixture.manager.stop_recording("cam1").await.unwrap();
    let elapsed = since.elapsed().as_secs_f64();

    info!("Recording ran for {:.3}s", stopped.duration_seconds);
    assert_eq!(stopped.output_path, started.output_path);
    assert!(stopped.duration_seconds >= 0.6);
    // Measured from before the spawn, so slightly longer than the caller's view
    assert!(stopped.duration_seconds >= elapsed - 0.05);
    assert!(stopped.duration_seconds <= elapsed + 0.5);

    assert!(fixture.wait_for_release("cam1", Purpose::Recording).await);
    assert_eq!(
        fixture.transcoder.terminations(),
        vec![("cam1".to_string(), Purpose::Recording, TerminationMode::Graceful)]
    );
}

#[tokio::test]
async fn test_self_exit_releases_key_and_publishes_once() {
    let fixture = TestFixture::new();

    for (code, expected) in [(1, SessionState::Error), (0, SessionState::Stopped)] {
        let mut events = fixture.manager.publisher().subscribe();
        fixture.manager.start_recording("cam1", TEST_SOURCE).await.unwrap();

        fixture
            .transcoder
            .crash("cam1", Purpose::Recording, code, "Connection refused");
        assert!(fixture.wait_for_release("cam1", Purpose::Recording).await);

        let terminal: Vec<_> = std::iter::from_fn(|| events.try_recv())
            .filter(|e| e.status.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 1, "exit code {}", code);
        assert_eq!(terminal[0].status, expected);
        assert_eq!(terminal[0].camera_id, "cam1");
        if expected == SessionState::Error {
            assert!(terminal[0].error.as_deref().unwrap().contains("Connection refused"));
        }
    }

    // No stop was ever requested
    assert!(fixture.transcoder.terminations().is_empty());
}

#[tokio::test]
async fn test_stop_all_uses_purpose_signals() {
    let fixture = TestFixture::new();
    let live = ["cam1", "cam2", "cam3"];
    let recording = ["cam2", "cam4"];

    for camera in live {
        start(&fixture, camera, Purpose::Live).await.unwrap();
    }
    for camera in recording {
        start(&fixture, camera, Purpose::Recording).await.unwrap();
    }
    assert_eq!(fixture.manager.list_active().len(), live.len() + recording.len());

    fixture.manager.stop_all().await;
    assert!(fixture.manager.sessions().is_empty());
    assert!(fixture.manager.list_active().is_empty());

    let terminations = fixture.transcoder.terminations();
    assert!(terminations.len() >= live.len() + recording.len());
    for (camera, purpose, mode) in &terminations {
        let expected = match purpose {
            Purpose::Live => TerminationMode::Forced,
            Purpose::Recording => TerminationMode::Graceful,
        };
        assert_eq!(*mode, expected, "{}/{}", camera, purpose);
    }
    for camera in live {
        assert!(terminations.contains(&(camera.to_string(), Purpose::Live, TerminationMode::Forced)));
        assert!(!fixture.config.storage.hls_root.join(camera).exists());
    }
    for camera in recording {
        assert!(terminations.contains(&(
            camera.to_string(),
            Purpose::Recording,
            TerminationMode::Graceful
        )));
    }
}

#[tokio::test]
async fn test_restart_after_release() {
    let fixture = TestFixture::new();

    start(&fixture, "cam1", Purpose::Live).await.unwrap();
    fixture.manager.stop_live("cam1").await.unwrap();
    assert!(fixture.wait_for_release("cam1", Purpose::Live).await);

    start(&fixture, "cam1", Purpose::Live).await.unwrap();
    assert_eq!(fixture.manager.list_active(), vec![SessionKey::live("cam1")]);
    assert_eq!(fixture.transcoder.spawned(), 2);
}
