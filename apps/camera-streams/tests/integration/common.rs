use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::sleep;

use camera_streams::{
    manager::StreamSessionManager,
    supervisor::{
        Invocation, ProcessEvent, ProcessExit, TerminationMode, Transcoder, TranscoderProcess,
    },
    Config, Purpose, StatusPublisher,
};

pub const TEST_SOURCE: &str = "rtsp://127.0.0.1:8554/test";

/// Every termination request the mock has received, in order.
pub type TerminationLog = Arc<Mutex<Vec<(String, Purpose, TerminationMode)>>>;

/// Stands in for ffmpeg: writes the live playlist on spawn, reports progress for
/// recordings and exits as soon as it is signalled.
#[derive(Default)]
pub struct MockTranscoder {
    pub terminations: TerminationLog,
    processes: Mutex<Vec<(Invocation, mpsc::UnboundedSender<ProcessEvent>)>>,
}

struct MockProcess {
    invocation: Invocation,
    terminations: TerminationLog,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
}

#[async_trait]
impl TranscoderProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(31337)
    }

    fn terminate(&mut self, mode: TerminationMode) -> io::Result<()> {
        self.terminations.lock().push((
            self.invocation.camera_id.clone(),
            self.invocation.purpose,
            mode,
        ));
        let _ = self.events_tx.send(ProcessEvent::Exited(ProcessExit {
            success: mode == TerminationMode::Graceful,
            code: (mode == TerminationMode::Graceful).then_some(0),
            detail: None,
        }));
        Ok(())
    }

    async fn next_event(&mut self) -> ProcessEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

impl Transcoder for MockTranscoder {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn TranscoderProcess>> {
        let (events_tx, events) = mpsc::unbounded_channel();
        match invocation.purpose {
            Purpose::Live => std::fs::write(&invocation.output_path, b"#EXTM3U\n")?,
            Purpose::Recording => {
                let _ = events_tx.send(ProcessEvent::Progress);
            }
        }

        self.processes
            .lock()
            .push((invocation.clone(), events_tx.clone()));
        Ok(Box::new(MockProcess {
            invocation: invocation.clone(),
            terminations: self.terminations.clone(),
            events_tx,
            events,
        }))
    }
}

impl MockTranscoder {
    pub fn spawned(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn terminations(&self) -> Vec<(String, Purpose, TerminationMode)> {
        self.terminations.lock().clone()
    }

    /// Makes the latest process for `camera_id`/`purpose` exit on its own.
    pub fn crash(&self, camera_id: &str, purpose: Purpose, code: i32, detail: &str) {
        let processes = self.processes.lock();
        if let Some((_, events)) = processes
            .iter()
            .rev()
            .find(|(inv, _)| inv.camera_id == camera_id && inv.purpose == purpose)
        {
            let _ = events.send(ProcessEvent::Exited(ProcessExit {
                success: code == 0,
                code: Some(code),
                detail: Some(detail.to_string()),
            }));
        }
    }
}

/// Test fixture for integration tests
pub struct TestFixture {
    pub temp: TempDir,
    pub config: Config,
    pub transcoder: Arc<MockTranscoder>,
    pub manager: Arc<StreamSessionManager>,
}

impl TestFixture {
    pub fn new() -> Self {
        super::init_test_environment();
        let temp = TempDir::new().unwrap();
        let config = super::create_test_config(temp.path());
        let transcoder = Arc::new(MockTranscoder::default());
        let manager = Arc::new(StreamSessionManager::new(
            &config,
            transcoder.clone(),
            StatusPublisher::new(),
            Handle::current(),
        ));

        Self {
            temp,
            config,
            transcoder,
            manager,
        }
    }

    /// Waits until the session for `camera_id`/`purpose` has been released.
    pub async fn wait_for_release(&self, camera_id: &str, purpose: Purpose) -> bool {
        wait_for_release(&self.manager, camera_id, purpose).await
    }
}

pub async fn wait_for_release(
    manager: &StreamSessionManager,
    camera_id: &str,
    purpose: Purpose,
) -> bool {
    for _ in 0..500 {
        if manager.session_info(camera_id, purpose).is_none() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}
