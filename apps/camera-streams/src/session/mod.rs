use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::status::{StatusEvent, StatusPublisher};
use crate::supervisor::{ProcessHandle, TerminationMode};

pub mod registry;

pub use registry::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Live,
    Recording,
}

impl Purpose {
    /// Live output has nothing to finalize; recordings must be allowed to write their
    /// trailer.
    pub fn termination_mode(self) -> TerminationMode {
        match self {
            Purpose::Live => TerminationMode::Forced,
            Purpose::Recording => TerminationMode::Graceful,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Live => "live",
            Purpose::Recording => "recording",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Active,
    Stopping,
    Stopped,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }

    /// Starting or active, i.e. not on its way out.
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Active)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Starting, Active)
                | (Starting, Error)
                | (Active, Error)
                | (Starting, Stopping)
                | (Active, Stopping)
                | (Stopping, Stopped)
                | (Starting, Stopped)
                | (Active, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub camera_id: String,
    pub purpose: Purpose,
}

impl SessionKey {
    pub fn new(camera_id: impl Into<String>, purpose: Purpose) -> Self {
        Self {
            camera_id: camera_id.into(),
            purpose,
        }
    }

    pub fn live(camera_id: impl Into<String>) -> Self {
        Self::new(camera_id, Purpose::Live)
    }

    pub fn recording(camera_id: impl Into<String>) -> Self {
        Self::new(camera_id, Purpose::Recording)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.camera_id, self.purpose)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub camera_id: String,
    pub purpose: Purpose,
    pub state: SessionState,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
}

struct SessionStatus {
    state: SessionState,
    last_error: Option<String>,
}

/// One managed transcoder run for a camera and purpose.
///
/// State only moves forward through [`SessionState::can_transition_to`]; every accepted
/// transition is published exactly once, under the session's lock, so subscribers see a
/// session's transitions in order.
pub struct Session {
    id: Uuid,
    key: SessionKey,
    output_path: PathBuf,
    started_at: DateTime<Utc>,
    started: Instant,
    status: Mutex<SessionStatus>,
    state_tx: watch::Sender<SessionState>,
    retired_tx: watch::Sender<bool>,
    process: Mutex<Option<ProcessHandle>>,
    publisher: StatusPublisher,
}

impl Session {
    /// Creates a session in `starting` and announces it.
    pub fn new(key: SessionKey, output_path: PathBuf, publisher: StatusPublisher) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Starting);
        let (retired_tx, _) = watch::channel(false);
        let session = Self {
            id: Uuid::new_v4(),
            key,
            output_path,
            started_at: Utc::now(),
            started: Instant::now(),
            status: Mutex::new(SessionStatus {
                state: SessionState::Starting,
                last_error: None,
            }),
            state_tx,
            retired_tx,
            process: Mutex::new(None),
            publisher,
        };
        session.publisher.publish(StatusEvent::new(
            &session.key.camera_id,
            session.key.purpose,
            SessionState::Starting,
            None,
        ));
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn camera_id(&self) -> &str {
        &self.key.camera_id
    }

    pub fn purpose(&self) -> Purpose {
        self.key.purpose
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Monotonic time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn state(&self) -> SessionState {
        self.status.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.lock().as_ref().and_then(|p| p.pid())
    }

    pub fn info(&self) -> SessionInfo {
        let status = self.status.lock();
        SessionInfo {
            session_id: self.id,
            camera_id: self.key.camera_id.clone(),
            purpose: self.key.purpose,
            state: status.state,
            output_path: self.output_path.clone(),
            started_at: self.started_at,
            uptime_seconds: self.elapsed().as_secs_f64(),
            pid: self.pid(),
            last_error: status.last_error.clone(),
        }
    }

    /// Applies `next` if the state machine allows it. Returns whether it was applied.
    pub(crate) fn transition(&self, next: SessionState, error: Option<String>) -> bool {
        let mut status = self.status.lock();
        let current = status.state;
        if !current.can_transition_to(next) {
            debug!(
                session = %self.key,
                from = %current,
                to = %next,
                "Ignoring invalid session transition"
            );
            return false;
        }

        status.state = next;
        if next == SessionState::Error {
            status.last_error = error.clone();
        }

        match next {
            SessionState::Error => warn!(
                session = %self.key,
                session_id = %self.id,
                error = error.as_deref().unwrap_or("unknown"),
                "Session failed"
            ),
            _ => info!(session = %self.key, session_id = %self.id, "Session {} -> {}", current, next),
        }

        self.publisher.publish(StatusEvent::new(
            &self.key.camera_id,
            self.key.purpose,
            next,
            if next == SessionState::Error { error } else { None },
        ));
        self.state_tx.send_replace(next);
        true
    }

    pub(crate) fn attach_process(&self, handle: ProcessHandle) {
        *self.process.lock() = Some(handle);
    }

    /// Asks the monitor task to signal the process. Returns false if no process is attached
    /// or it has already gone away.
    pub(crate) fn signal(&self, mode: TerminationMode) -> bool {
        match self.process.lock().as_ref() {
            Some(handle) => handle.terminate(mode),
            None => false,
        }
    }

    /// Resolves once the session left `starting`, or after `timeout`.
    pub async fn wait_settled(&self, timeout: Duration) -> SessionState {
        let mut rx = self.state_tx.subscribe();
        let settled = tokio::time::timeout(timeout, rx.wait_for(|s| *s != SessionState::Starting))
            .await
            .map(|r| r.map(|state| *state));
        match settled {
            Ok(Ok(state)) => state,
            _ => self.state(),
        }
    }

    /// Resolves once the session reached `stopped` or `error`.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.state_tx.subscribe();
        let terminal = rx.wait_for(|s| s.is_terminal()).await.map(|state| *state);
        match terminal {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Marks the session as fully cleaned up: output handled and registry entry gone.
    pub(crate) fn retire(&self) {
        self.retired_tx.send_replace(true);
    }

    pub fn is_retired(&self) -> bool {
        *self.retired_tx.borrow()
    }

    /// Resolves once [`Session::retire`] was called.
    pub async fn wait_retired(&self) {
        let mut rx = self.retired_tx.subscribe();
        let _ = rx.wait_for(|retired| *retired).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .field("output_path", &self.output_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(publisher: &StatusPublisher) -> Session {
        Session::new(
            SessionKey::live("cam1"),
            PathBuf::from("/tmp/hls/cam1/index.m3u8"),
            publisher.clone(),
        )
    }

    #[test]
    fn test_purpose_termination_modes() {
        assert_eq!(Purpose::Live.termination_mode(), TerminationMode::Forced);
        assert_eq!(Purpose::Recording.termination_mode(), TerminationMode::Graceful);
    }

    #[test]
    fn test_state_machine() {
        use SessionState::*;
        assert!(Starting.can_transition_to(Active));
        assert!(Active.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Active.can_transition_to(Stopped));
        assert!(Active.can_transition_to(Error));

        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Error.can_transition_to(Active));
        assert!(!Stopping.can_transition_to(Active));
        assert!(!Stopping.can_transition_to(Error));
        assert!(!Active.can_transition_to(Starting));
    }

    #[tokio::test]
    async fn test_transitions_publish_once() {
        let publisher = StatusPublisher::new();
        let mut events = publisher.subscribe();
        let session = test_session(&publisher);

        assert!(session.transition(SessionState::Active, None));
        assert!(!session.transition(SessionState::Active, None));
        assert!(session.transition(SessionState::Error, Some("exit status 1".into())));
        assert!(!session.transition(SessionState::Stopped, None));

        let seen: Vec<_> = std::iter::from_fn(|| events.try_recv()).collect();
        let states: Vec<_> = seen.iter().map(|e| e.status).collect();
        assert_eq!(
            states,
            vec![SessionState::Starting, SessionState::Active, SessionState::Error]
        );
        assert_eq!(seen[2].error.as_deref(), Some("exit status 1"));
        assert_eq!(session.last_error().as_deref(), Some("exit status 1"));
    }

    #[tokio::test]
    async fn test_wait_settled_times_out_in_starting() {
        let session = test_session(&StatusPublisher::new());
        let state = session.wait_settled(Duration::from_millis(20)).await;
        assert_eq!(state, SessionState::Starting);
    }

    #[tokio::test]
    async fn test_wait_terminal() {
        let session = std::sync::Arc::new(test_session(&StatusPublisher::new()));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_terminal().await })
        };

        session.transition(SessionState::Active, None);
        session.transition(SessionState::Stopping, None);
        session.transition(SessionState::Stopped, None);
        assert_eq!(waiter.await.unwrap(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_settled_sees_activation() {
        let session = std::sync::Arc::new(test_session(&StatusPublisher::new()));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_settled(Duration::from_secs(5)).await })
        };

        session.transition(SessionState::Active, None);
        assert_eq!(waiter.await.unwrap(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_retire() {
        let session = std::sync::Arc::new(test_session(&StatusPublisher::new()));
        assert!(!session.is_retired());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_retired().await })
        };
        session.retire();
        waiter.await.unwrap();
        assert!(session.is_retired());
    }

    #[test]
    fn test_signal_without_process() {
        let session = test_session(&StatusPublisher::new());
        assert!(!session.signal(TerminationMode::Forced));
        assert_eq!(session.pid(), None);
    }
}
