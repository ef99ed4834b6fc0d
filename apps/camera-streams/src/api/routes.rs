use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::debug;

use crate::api::{recordings, streams, ApiError, AppState};
use crate::session::Purpose;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .route("/cameras", web::get().to(list_cameras))
            .service(web::scope("/streams").configure(streams::configure))
            .service(web::scope("/recordings").configure(recordings::configure)),
    );
}

async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    debug!("Health check requested");
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": state.config.app.name,
        "active_sessions": state.manager.list_active().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Configured cameras, each with whether it is streaming and recording right now.
async fn list_cameras(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let cameras: Vec<_> = state
        .cameras
        .list()
        .await
        .into_iter()
        .map(|camera| {
            json!({
                "id": camera.id,
                "name": camera.name,
                "live": state.manager.is_active(&camera.id, Purpose::Live),
                "recording": state.manager.is_active(&camera.id, Purpose::Recording),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cameras": cameras,
    })))
}
