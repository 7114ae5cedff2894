// src/handlers/health.rs
use crate::AppState;
use axum::{extract::Extension, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ollama", get(ollama_health))
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let store_status = match state.store.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::warn!("Store health check failed: {}", e);
            "unhealthy"
        }
    };
    let ollama_status = state.ollama.health_check().await;

    Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "store": {
                "backend": state.store.backend_name(),
                "status": store_status,
            },
            "ollama": ollama_status,
        }
    }))
}

async fn ollama_health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let status = state.ollama.health_check().await;
    let models = state.ollama.list_models().await;

    Json(json!({
        "status": status,
        "models": models,
    }))
}
