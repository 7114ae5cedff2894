// lib.rs - exports the application modules so the server binary, the
// maintenance binaries, and the integration tests share one router.
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod markdown;
pub mod middleware;
pub mod models;
pub mod ollama_client;
pub mod services;
pub mod store;
pub mod views;

use axum::{Extension, Router};
use std::sync::Arc;

/// Shared application state: configuration plus the long-lived clients and
/// the per-session completion locks.
pub struct AppState {
    pub config: config::AppConfig,
    pub store: store::SharedSessionStore,
    pub chat_service: services::ChatService,
    pub ollama: ollama_client::OllamaClient,
    pub completion_manager: jobs::SharedCompletionManager,
    pub rate_limiter: middleware::rate_limit::RateLimiter,
    pub chat_rate_limiter: middleware::rate_limit::RateLimiter,
}

impl AppState {
    pub fn new(config: config::AppConfig, store: store::SharedSessionStore) -> Self {
        let chat_service = services::ChatService::new(store.clone(), config.clone());
        let ollama = ollama_client::OllamaClient::new(
            config.ollama_base_url.clone(),
            config.ollama_timeout,
            config.health_check_timeout,
        );

        Self {
            store,
            chat_service,
            ollama,
            completion_manager: Arc::new(jobs::CompletionManager::new()),
            rate_limiter: middleware::rate_limit::RateLimiter::new(
                config.rate_limit_max_requests,
                config.rate_limit_window_secs,
            ),
            chat_rate_limiter: middleware::rate_limit::RateLimiter::new(
                config.chat_rate_limit_max_requests,
                config.rate_limit_window_secs,
            ),
            config,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::chat::chat_routes())
        .merge(handlers::api::api_routes())
        .merge(handlers::health::health_routes())
        .layer(axum::middleware::from_fn(
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::security::security_headers_middleware,
        ))
        .layer(Extension(state))
}
