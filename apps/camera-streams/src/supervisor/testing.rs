//! In-memory transcoder for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Invocation, ProcessEvent, ProcessExit, TerminationMode, Transcoder, TranscoderProcess};
use crate::session::Purpose;

pub(crate) type Signals = Arc<Mutex<Vec<(String, Purpose, TerminationMode)>>>;

/// Exits as soon as it is signalled, or when the test pushes an event.
pub(crate) struct ScriptedProcess {
    invocation: Invocation,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    signals: Signals,
}

#[async_trait]
impl TranscoderProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn terminate(&mut self, mode: TerminationMode) -> io::Result<()> {
        self.signals.lock().push((
            self.invocation.camera_id.clone(),
            self.invocation.purpose,
            mode,
        ));
        let graceful = mode == TerminationMode::Graceful;
        let _ = self.events_tx.send(ProcessEvent::Exited(ProcessExit {
            success: graceful,
            code: graceful.then_some(0),
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

#[derive(Default)]
pub(crate) struct ScriptedTranscoder {
    pub fail: bool,
    /// Write the live playlist right away, like a healthy ffmpeg would shortly after start.
    pub write_playlist: bool,
    pub signals: Signals,
    controls: Mutex<Vec<(Invocation, mpsc::UnboundedSender<ProcessEvent>)>>,
}

impl ScriptedTranscoder {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self {
            write_playlist: true,
            ..Default::default()
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    /// Sends `event` to every process spawned for `camera_id` and `purpose`.
    pub fn send(&self, camera_id: &str, purpose: Purpose, event: ProcessEvent) {
        for (invocation, control) in self.controls.lock().iter() {
            if invocation.camera_id == camera_id && invocation.purpose == purpose {
                let _ = control.send(event.clone());
            }
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.controls.lock().len()
    }

    pub fn signals(&self) -> Vec<(String, Purpose, TerminationMode)> {
        self.signals.lock().clone()
    }
}

impl Transcoder for ScriptedTranscoder {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn TranscoderProcess>> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ffmpeg not installed"));
        }
        if self.write_playlist && invocation.purpose == Purpose::Live {
            std::fs::write(&invocation.output_path, b"#EXTM3U\n")?;
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        self.controls
            .lock()
            .push((invocation.clone(), events_tx.clone()));
        Ok(Box::new(ScriptedProcess {
            invocation: invocation.clone(),
            events,
            events_tx,
            signals: self.signals.clone(),
        }))
    }
}
