use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::{info, warn};

use crate::api::{ApiError, AppState};
use crate::session::Purpose;
use crate::storage::validate_camera_id;
use crate::supervisor::LiveOptions;
use crate::StreamManagerError;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(stream_status))
        .route("/start-all", web::post().to(start_all_streams))
        .route("/stop-all", web::post().to(stop_all_streams))
        .route("/{camera_id}/start", web::post().to(start_stream))
        .route("/{camera_id}/stop", web::post().to(stop_stream));
}

/// An empty body means default encoding options.
fn parse_options(body: &[u8]) -> Result<LiveOptions, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(LiveOptions::default());
    }
    Ok(serde_json::from_slice(body)?)
}

async fn start_stream(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;
    let options = parse_options(&body)?;
    let source_uri = state.cameras.source_uri(&camera_id).await?;

    let started = state
        .manager
        .start_live(&camera_id, &source_uri, &options)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cameraId": camera_id,
        "hlsUrl": started.hls_url,
        "state": started.state,
    })))
}

async fn stop_stream(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    state.manager.stop_live(&camera_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cameraId": camera_id,
    })))
}

/// Starts live streaming for every configured camera. One camera failing does not stop
/// the others; a camera that is already streaming counts as started.
async fn start_all_streams(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let cameras = state.cameras.list().await;
    let options = LiveOptions::default();
    let mut results = Vec::with_capacity(cameras.len());
    let mut started = 0;

    for camera in cameras {
        let hls_url = state.manager.directories().hls_url(&camera.id);
        let result = match state
            .manager
            .start_live(&camera.id, &camera.source_uri, &options)
            .await
        {
            Ok(live) => {
                started += 1;
                json!({ "cameraId": camera.id, "success": true, "hlsUrl": live.hls_url })
            }
            Err(StreamManagerError::AlreadyActive { .. }) => {
                started += 1;
                json!({
                    "cameraId": camera.id,
                    "success": true,
                    "alreadyActive": true,
                    "hlsUrl": hls_url,
                })
            }
            Err(e) => {
                warn!(camera_id = %camera.id, "Failed to start live stream: {}", e);
                json!({ "cameraId": camera.id, "success": false, "error": e.to_string() })
            }
        };
        results.push(result);
    }

    info!("Started {} of {} live streams", started, results.len());
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "started": started,
        "results": results,
    })))
}

async fn stop_all_streams(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let mut stopped = 0;
    for key in state.manager.list_active() {
        if key.purpose != Purpose::Live {
            continue;
        }
        match state.manager.stop_live(&key.camera_id).await {
            Ok(()) => stopped += 1,
            // Exited on its own in the meantime
            Err(StreamManagerError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    info!("Stopped {} live streams", stopped);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "stopped": stopped,
    })))
}

async fn stream_status(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let sessions: Vec<_> = state
        .manager
        .list_active()
        .into_iter()
        .filter_map(|key| state.manager.session_info(&key.camera_id, key.purpose))
        .map(|info| {
            let hls_url = (info.purpose == Purpose::Live)
                .then(|| state.manager.directories().hls_url(&info.camera_id));
            json!({
                "cameraId": info.camera_id,
                "purpose": info.purpose,
                "state": info.state,
                "startedAt": info.started_at,
                "uptimeSeconds": info.uptime_seconds,
                "hlsUrl": hls_url,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "sessions": sessions,
    })))
}
