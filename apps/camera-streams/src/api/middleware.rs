use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub fn request_logger() -> RequestLogger {
    RequestLogger
}

/// Logs every API request with its outcome. Playlist and segment fetches from players are
/// frequent, so anything outside `/api` only shows up at debug level.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let path = req.path().to_string();
        let quiet = !path.starts_with("/api");
        let start_time = Instant::now();

        req.extensions_mut().insert(request_id);

        Box::pin(async move {
            let result = service.call(req).await;
            let duration_ms = start_time.elapsed().as_millis();

            match &result {
                Ok(res) => {
                    let status = res.status();
                    if quiet || status.as_u16() == 101 {
                        debug!(%request_id, %method, %path, %status, duration_ms, "Request completed");
                    } else if status.is_success() {
                        info!(%request_id, %method, %path, %status, duration_ms, "Request completed");
                    } else if status.is_client_error() {
                        warn!(%request_id, %method, %path, %status, duration_ms, "Client error");
                    } else {
                        error!(%request_id, %method, %path, %status, duration_ms, "Server error");
                    }
                }
                Err(err) => {
                    error!(%request_id, %method, %path, error = %err, duration_ms, "Request failed");
                }
            }

            result
        })
    }
}
