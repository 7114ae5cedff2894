use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use uuid::Uuid;

/// Structured request logging: one line in, one line out, correlated by a
/// per-request id. The completion line's level follows the status class.
pub async fn request_logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    tracing::debug!(%request_id, %method, %path, "incoming request");

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;

    match status {
        500..=599 => {
            tracing::error!(%request_id, %method, %path, status, duration_ms, "request completed (server error)")
        }
        400..=499 => {
            tracing::warn!(%request_id, %method, %path, status, duration_ms, "request completed (client error)")
        }
        _ => tracing::info!(%request_id, %method, %path, status, duration_ms, "request completed"),
    }

    response
}
