// src/handlers/api.rs
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn api_routes() -> Router {
    Router::new().route("/api/sessions", get(list_sessions))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    skip: Option<i64>,
}

/// Session summaries for the sidebar, as JSON. API routes answer with an
/// envelope rather than an error page.
async fn list_sessions(
    Query(query): Query<ListQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<Value>) {
    match state
        .chat_service
        .list_sessions(query.limit, query.skip)
        .await
    {
        Ok(summaries) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "sessions": summaries,
            })),
        ),
        Err(e) => {
            tracing::error!("Failed to list sessions: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Failed to load sessions",
                })),
            )
        }
    }
}
