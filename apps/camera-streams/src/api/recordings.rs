use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::api::{ApiError, AppState};
use crate::storage::validate_camera_id;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(list_recordings))
        .route("/{camera_id}/start", web::post().to(start_recording))
        .route("/{camera_id}/stop", web::post().to(stop_recording))
        .route("/{file_name}", web::delete().to(delete_recording));
}

async fn start_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    validate_camera_id(&camera_id)?;
    let source_uri = state.cameras.source_uri(&camera_id).await?;

    let started = state
        .manager
        .start_recording(&camera_id, &source_uri)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cameraId": camera_id,
        "outputPath": started.output_path,
        "state": started.state,
    })))
}

async fn stop_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    let stopped = state.manager.stop_recording(&camera_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cameraId": camera_id,
        "outputPath": stopped.output_path,
        "durationSeconds": stopped.duration_seconds,
    })))
}

async fn list_recordings(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let recordings = state.manager.list_recordings().await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "recordings": recordings,
    })))
}

async fn delete_recording(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let file_name = path.into_inner();
    state.manager.delete_recording(&file_name).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "fileName": file_name,
    })))
}
