//! Spawns one transcoder per session and turns its lifecycle into session transitions.
//!
//! Each process is owned by a dedicated monitor task. The task consumes discrete events
//! (progress reports, readiness polls, termination requests, exit) and is the only place
//! that moves a session to `active`, `stopped` or `error`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::{Session, SessionState};
use crate::{Result, StreamManagerError};

pub mod command;
pub mod process;

pub use command::{CommandBuilder, Invocation, LiveEncoding, LiveOptions};
pub use process::{
    FfmpegTranscoder, ProcessEvent, ProcessExit, TerminationMode, Transcoder, TranscoderProcess,
};

/// What counts as "the process is producing usable output".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The given file exists.
    Artifact(PathBuf),
    /// The engine reported progress or is still running at the first poll.
    Liveness,
}

/// Control side of a monitored process. Cloning it does not duplicate the process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<TerminationMode>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queues a termination request. Returns false once the monitor has finished.
    pub(crate) fn terminate(&self, mode: TerminationMode) -> bool {
        self.control.send(mode).is_ok()
    }
}

pub struct ProcessSupervisor {
    transcoder: Arc<dyn Transcoder>,
    runtime: Handle,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    /// Processes are spawned and monitored on `runtime`, whichever thread asks for them.
    pub fn new(transcoder: Arc<dyn Transcoder>, runtime: Handle, poll_interval: Duration) -> Self {
        Self {
            transcoder,
            runtime,
            poll_interval,
        }
    }

    /// Launches `invocation` for `session` and starts monitoring it.
    pub fn spawn(
        &self,
        session: Arc<Session>,
        invocation: &Invocation,
        readiness: Readiness,
    ) -> Result<ProcessHandle> {
        let process = {
            let _guard = self.runtime.enter();
            self.transcoder.spawn(invocation)
        }
        .map_err(|e| {
            StreamManagerError::SpawnFailure(format!("{}: {}", invocation.program.display(), e))
        })?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = ProcessHandle {
            pid: process.pid(),
            control: control_tx,
        };
        session.attach_process(handle.clone());

        debug!(
            session = %session.key(),
            session_id = %session.id(),
            pid = ?handle.pid,
            ?readiness,
            "Monitoring transcoder"
        );
        self.runtime.spawn(monitor(
            session,
            process,
            control_rx,
            readiness,
            self.poll_interval,
        ));
        Ok(handle)
    }

    /// Signals the session's process with `mode`. Does not wait for it to exit.
    pub fn terminate(&self, session: &Session, mode: TerminationMode) -> bool {
        let sent = session.signal(mode);
        if !sent {
            debug!(session = %session.key(), ?mode, "No running process to terminate");
        }
        sent
    }
}

async fn readiness_observed(readiness: &Readiness) -> bool {
    match readiness {
        Readiness::Artifact(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
        Readiness::Liveness => true,
    }
}

async fn monitor(
    session: Arc<Session>,
    mut process: Box<dyn TranscoderProcess>,
    mut control_rx: mpsc::UnboundedReceiver<TerminationMode>,
    readiness: Readiness,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; readiness is checked from the second one on.
    ticker.tick().await;

    let exit = loop {
        let starting = session.state() == SessionState::Starting;
        tokio::select! {
            event = process.next_event() => match event {
                ProcessEvent::Exited(exit) => break exit,
                ProcessEvent::Progress => {
                    if starting && readiness_observed(&readiness).await {
                        session.transition(SessionState::Active, None);
                    }
                }
            },
            Some(mode) = control_rx.recv() => {
                if let Err(e) = process.terminate(mode) {
                    warn!(session = %session.key(), ?mode, "Failed to signal transcoder: {}", e);
                }
            }
            _ = ticker.tick(), if starting => {
                if readiness_observed(&readiness).await {
                    session.transition(SessionState::Active, None);
                }
            }
        }
    };

    info!(
        session = %session.key(),
        session_id = %session.id(),
        code = ?exit.code,
        success = exit.success,
        "Transcoder exited"
    );

    // Once a stop was requested any exit is the expected one.
    if session.state() == SessionState::Stopping || exit.success {
        session.transition(SessionState::Stopped, None);
    } else {
        session.transition(SessionState::Error, Some(exit.describe()));
    }
}

#[cfg(test)]
pub(crate) mod testing;
