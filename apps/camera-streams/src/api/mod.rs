//! REST and WebSocket surface over [`StreamSessionManager`].

pub mod error;
pub mod middleware;
pub mod recordings;
pub mod routes;
pub mod streams;
pub mod websocket;

pub use error::ApiError;
pub use routes::configure_routes;

use actix_files::Files;
use actix_web::{dev::Server, web, App, HttpServer};
use std::sync::Arc;
use tracing::info;

use crate::camera::CameraDirectory;
use crate::config::Config;
use crate::manager::StreamSessionManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StreamSessionManager>,
    pub cameras: Arc<dyn CameraDirectory>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        manager: Arc<StreamSessionManager>,
        cameras: Arc<dyn CameraDirectory>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            manager,
            cameras,
            config,
        }
    }
}

/// Binds the API listener. The returned server must be awaited on an actix system.
pub fn build_server(state: AppState) -> std::io::Result<Server> {
    let config = state.config.clone();
    let serve_hls = config.api.serve_hls;
    let hls_root = config.storage.hls_root.clone();
    let hls_mount = config.storage.hls_base_url.trim_end_matches('/').to_string();

    let mut server = HttpServer::new(move || {
        let app = App::new()
            .wrap(middleware::request_logger())
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
            .configure(websocket::configure);

        // Only a relative base URL can be served from here
        if serve_hls && hls_mount.starts_with('/') {
            app.service(Files::new(&hls_mount, hls_root.clone()))
        } else {
            app
        }
    })
    .shutdown_timeout(config.app.shutdown_timeout_seconds)
    .disable_signals();

    if let Some(workers) = config.api.worker_threads {
        server = server.workers(workers);
    }

    let server = server.bind((config.api.host.as_str(), config.api.port))?;
    info!(
        host = %config.api.host,
        port = config.api.port,
        serve_hls,
        "API server listening"
    );
    Ok(server.run())
}
