use actix_web::{
    error::ResponseError,
    http::StatusCode,
    HttpResponse,
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

use crate::StreamManagerError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        };

        let message = self.to_string();

        match self {
            ApiError::InternalError(_) | ApiError::ServiceUnavailable(_) => error!("{}", message),
            _ => warn!("{}", message),
        }

        HttpResponse::build(status).json(json!({
            "success": false,
            "error": error_type,
            "message": message,
            "status_code": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

impl From<StreamManagerError> for ApiError {
    fn from(err: StreamManagerError) -> Self {
        let message = err.to_string();
        match err {
            StreamManagerError::AlreadyActive { .. }
            | StreamManagerError::RecordingInProgress(_) => ApiError::Conflict(message),
            StreamManagerError::NotFound { .. }
            | StreamManagerError::CameraNotFound(_)
            | StreamManagerError::RecordingNotFound(_) => ApiError::NotFound(message),
            StreamManagerError::InvalidCameraId(_) | StreamManagerError::InvalidOptions(_) => {
                ApiError::BadRequest(message)
            }
            StreamManagerError::SpawnFailure(_) => ApiError::ServiceUnavailable(message),
            StreamManagerError::FilesystemError { .. }
            | StreamManagerError::ConfigError(_)
            | StreamManagerError::IoError(_) => ApiError::InternalError(message),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {}", err))
    }
}
