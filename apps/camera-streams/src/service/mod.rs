//! Process lifetime: waits for a shutdown signal, then winds everything down.

pub mod signals;

pub use signals::{SignalHandler, SignalType};

use actix_web::dev::ServerHandle;
use std::sync::Arc;
use tracing::info;

use crate::manager::StreamSessionManager;

pub struct ServiceManager {
    manager: Arc<StreamSessionManager>,
    signal_handler: SignalHandler,
    api: Option<ServerHandle>,
}

impl ServiceManager {
    pub fn new(manager: Arc<StreamSessionManager>, signal_handler: SignalHandler) -> Self {
        Self {
            manager,
            signal_handler,
            api: None,
        }
    }

    pub fn with_api(mut self, handle: ServerHandle) -> Self {
        self.api = Some(handle);
        self
    }

    /// Blocks until SIGTERM or SIGINT, then shuts down.
    pub async fn run(&self) {
        loop {
            let signal_type = self.signal_handler.wait_for_signal().await;
            if signal_type.is_shutdown() {
                info!("Received {:?}, initiating graceful shutdown", signal_type);
                break;
            }
            self.dump_status();
        }
        self.shutdown().await;
    }

    /// Stops every session (recordings get to finalize their files) and then the API.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.manager.stop_all().await;

        if let Some(api) = &self.api {
            api.stop(true).await;
            info!("API server stopped");
        }
    }

    fn dump_status(&self) {
        let sessions = self.manager.sessions();
        info!("Status dump: {} sessions", sessions.len());
        for session in sessions {
            info!(
                camera_id = %session.camera_id,
                purpose = %session.purpose,
                state = %session.state,
                pid = ?session.pid,
                uptime_seconds = session.uptime_seconds,
                output = %session.output_path.display(),
                "Session"
            );
        }
    }
}
