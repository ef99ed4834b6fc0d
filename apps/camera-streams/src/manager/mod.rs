//! Public entry point: starts and stops live and recording sessions per camera.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::session::{Purpose, Session, SessionInfo, SessionKey, SessionRegistry, SessionState};
use crate::status::StatusPublisher;
use crate::storage::{validate_camera_id, DirectoryManager, RecordingFile};
use crate::supervisor::{
    CommandBuilder, Invocation, LiveOptions, ProcessSupervisor, Readiness, TerminationMode,
    Transcoder,
};
use crate::{Result, StreamManagerError};

/// How long `stop_all` waits after escalating to a forced kill.
const FORCED_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStarted {
    pub hls_url: String,
    pub playlist_path: PathBuf,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStarted {
    pub output_path: PathBuf,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStopped {
    pub output_path: PathBuf,
    pub duration_seconds: f64,
}

pub struct StreamSessionManager {
    registry: Arc<SessionRegistry>,
    supervisor: ProcessSupervisor,
    directories: DirectoryManager,
    commands: CommandBuilder,
    publisher: StatusPublisher,
    runtime: Handle,
    readiness_timeout: Duration,
    shutdown_timeout: Duration,
}

impl StreamSessionManager {
    /// Builds the manager around an explicitly provided publisher and transcoder. Sessions
    /// are monitored on `runtime`.
    pub fn new(
        config: &Config,
        transcoder: Arc<dyn Transcoder>,
        publisher: StatusPublisher,
        runtime: Handle,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(publisher.clone())),
            supervisor: ProcessSupervisor::new(
                transcoder,
                runtime.clone(),
                config.transcoder.readiness_poll_interval(),
            ),
            directories: DirectoryManager::new(&config.storage),
            commands: CommandBuilder::new(&config.transcoder, &config.live),
            publisher,
            runtime,
            readiness_timeout: config.transcoder.readiness_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn directories(&self) -> &DirectoryManager {
        &self.directories
    }

    pub async fn start_live(
        &self,
        camera_id: &str,
        source_uri: &str,
        options: &LiveOptions,
    ) -> Result<LiveStarted> {
        validate_camera_id(camera_id)?;
        let output = self.directories.live_output(camera_id);
        let invocation = self.commands.live(camera_id, source_uri, &output, options)?;

        let session = self
            .registry
            .acquire(SessionKey::live(camera_id), output.playlist.clone())?;

        if let Err(e) = self.directories.prepare_live_output(camera_id).await {
            return Err(self.abandon(&session, e).await);
        }

        let state = self
            .launch(&session, &invocation, Readiness::Artifact(output.playlist.clone()))
            .await?;

        Ok(LiveStarted {
            hls_url: self.directories.hls_url(camera_id),
            playlist_path: output.playlist,
            state,
        })
    }

    /// Kills the live transcoder and removes its output. Does not wait for the exit.
    pub async fn stop_live(&self, camera_id: &str) -> Result<()> {
        validate_camera_id(camera_id)?;
        self.stop_session(SessionKey::live(camera_id))?;
        self.directories.purge_live_output(camera_id).await?;
        Ok(())
    }

    pub async fn start_recording(
        &self,
        camera_id: &str,
        source_uri: &str,
    ) -> Result<RecordingStarted> {
        validate_camera_id(camera_id)?;
        let at = Utc::now();
        let output_path = self.directories.recording_path(camera_id, at);
        let invocation = self.commands.recording(camera_id, source_uri, &output_path)?;

        let session = self
            .registry
            .acquire(SessionKey::recording(camera_id), output_path.clone())?;

        match self.directories.prepare_recording_output(camera_id, at).await {
            Ok(prepared) => debug_assert_eq!(prepared, output_path),
            Err(e) => return Err(self.abandon(&session, e).await),
        }

        let state = self.launch(&session, &invocation, Readiness::Liveness).await?;
        Ok(RecordingStarted { output_path, state })
    }

    /// Asks the recorder to finalize its file. Does not wait for the exit.
    pub async fn stop_recording(&self, camera_id: &str) -> Result<RecordingStopped> {
        validate_camera_id(camera_id)?;
        let session = self.stop_session(SessionKey::recording(camera_id))?;
        Ok(RecordingStopped {
            output_path: session.output_path().to_path_buf(),
            duration_seconds: session.elapsed().as_secs_f64(),
        })
    }

    /// Sessions that are starting or active, ordered by camera then purpose.
    pub fn list_active(&self) -> Vec<SessionKey> {
        self.registry
            .list_all()
            .into_iter()
            .filter(|s| s.state().is_running())
            .map(|s| s.key().clone())
            .collect()
    }

    pub fn is_active(&self, camera_id: &str, purpose: Purpose) -> bool {
        self.registry
            .get(&SessionKey::new(camera_id, purpose))
            .is_some_and(|s| s.state().is_running())
    }

    pub fn session_info(&self, camera_id: &str, purpose: Purpose) -> Option<SessionInfo> {
        self.registry
            .get(&SessionKey::new(camera_id, purpose))
            .map(|s| s.info())
    }

    /// Every registered session, including those still shutting down.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list_all().iter().map(|s| s.info()).collect()
    }

    /// Stops every session with its purpose's signal and waits, bounded by the shutdown
    /// timeout, for all of them to be cleaned up. Stragglers are killed and dropped.
    pub async fn stop_all(&self) {
        let sessions = self.registry.list_all();
        if sessions.is_empty() {
            return;
        }
        info!("Stopping {} sessions", sessions.len());

        for session in &sessions {
            if session.transition(SessionState::Stopping, None) {
                self.supervisor
                    .terminate(session, session.purpose().termination_mode());
            }
        }

        let all_retired = join_all(sessions.iter().map(|s| s.wait_retired()));
        if tokio::time::timeout(self.shutdown_timeout, all_retired).await.is_ok() {
            info!("All sessions stopped");
            return;
        }

        warn!("Graceful stop timed out, forcing remaining sessions");
        let remaining: Vec<_> = sessions.iter().filter(|s| !s.is_retired()).collect();
        for session in &remaining {
            warn!(session = %session.key(), pid = ?session.pid(), "Force stopping session");
            self.supervisor.terminate(session, TerminationMode::Forced);
        }

        let forced = join_all(remaining.iter().map(|s| s.wait_retired()));
        if tokio::time::timeout(FORCED_STOP_GRACE, forced).await.is_err() {
            for session in remaining.iter().filter(|s| !s.is_retired()) {
                error!(
                    session = %session.key(),
                    pid = ?session.pid(),
                    "Session did not exit, dropping it from the registry"
                );
                self.registry.release_session(session);
            }
        }
    }

    pub async fn list_recordings(&self) -> Result<Vec<RecordingFile>> {
        self.directories.list_recordings().await
    }

    /// Deletes an archived recording. Files still being written are refused.
    pub async fn delete_recording(&self, file_name: &str) -> Result<PathBuf> {
        let in_progress = self.registry.list_all().into_iter().any(|s| {
            s.purpose() == Purpose::Recording
                && !s.is_retired()
                && s.output_path().file_name().is_some_and(|name| name == file_name)
        });
        if in_progress {
            return Err(StreamManagerError::RecordingInProgress(file_name.to_string()));
        }
        self.directories.delete_recording(file_name).await
    }

    /// Spawns the transcoder for a freshly acquired session and waits, bounded, for it
    /// to become ready.
    async fn launch(
        &self,
        session: &Arc<Session>,
        invocation: &Invocation,
        readiness: Readiness,
    ) -> Result<SessionState> {
        if let Err(e) = self.supervisor.spawn(session.clone(), invocation, readiness) {
            return Err(self.abandon(session, e).await);
        }
        self.watch_exit(session.clone());

        // A stop that raced the spawn found no process to signal.
        if session.state() == SessionState::Stopping {
            self.supervisor
                .terminate(session, session.purpose().termination_mode());
        }

        match session.wait_settled(self.readiness_timeout).await {
            SessionState::Starting => {
                warn!(
                    session = %session.key(),
                    timeout = ?self.readiness_timeout,
                    "No readiness signal yet, reporting start anyway"
                );
                Ok(SessionState::Starting)
            }
            SessionState::Error => {
                session.wait_retired().await;
                Err(StreamManagerError::SpawnFailure(
                    session
                        .last_error()
                        .unwrap_or_else(|| "transcoder failed during startup".to_string()),
                ))
            }
            state => Ok(state),
        }
    }

    /// Fails a session that never got a process and frees its key.
    async fn abandon(&self, session: &Arc<Session>, err: StreamManagerError) -> StreamManagerError {
        error!(session = %session.key(), "Failed to start session: {}", err);
        session.transition(SessionState::Error, Some(err.to_string()));
        self.cleanup(session).await;
        err
    }

    fn stop_session(&self, key: SessionKey) -> Result<Arc<Session>> {
        let not_found = || StreamManagerError::NotFound {
            camera_id: key.camera_id.clone(),
            purpose: key.purpose,
        };

        let session = self.registry.get(&key).ok_or_else(not_found)?;
        // Fails when the session is already stopping or has just exited.
        if !session.transition(SessionState::Stopping, None) {
            return Err(not_found());
        }

        let mode = key.purpose.termination_mode();
        info!(session = %key, ?mode, "Stopping session");
        self.supervisor.terminate(&session, mode);
        Ok(session)
    }

    /// Releases the session once its process is gone.
    fn watch_exit(&self, session: Arc<Session>) {
        let registry = self.registry.clone();
        let directories = self.directories.clone();
        self.runtime.spawn(async move {
            let state = session.wait_terminal().await;
            debug!(session = %session.key(), %state, "Session finished");
            cleanup(&registry, &directories, &session).await;
        });
    }

    async fn cleanup(&self, session: &Session) {
        cleanup(&self.registry, &self.directories, session).await;
    }
}

/// Live output is removed while the key is still held, so a successor can never lose its
/// fresh directory to this cleanup.
async fn cleanup(registry: &SessionRegistry, directories: &DirectoryManager, session: &Session) {
    if session.purpose() == Purpose::Live {
        if let Err(e) = directories.purge_live_output(session.camera_id()).await {
            warn!(session = %session.key(), "Failed to purge live output: {}", e);
        }
    }
    registry.release_session(session);
    session.retire();
}
