use crate::views;
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Fixed-window per-IP limiter. Windows are tracked in memory; this is a
/// single-process server, so there is nothing to coordinate across nodes.
#[derive(Clone)]
pub struct RateLimiter {
    // IP -> (request count, window start)
    clients: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    pub fn check(&self, client_ip: &str) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let now = Instant::now();

        match clients.get_mut(client_ip) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) > self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                clients.insert(client_ip.to_string(), (1, now));
                true
            }
        }
    }

    pub fn cleanup_expired(&self) {
        let mut clients = self.clients.lock().unwrap();
        let now = Instant::now();
        clients.retain(|_, (_, window_start)| now.duration_since(*window_start) <= self.window);
    }
}

async fn enforce(
    limiter: &RateLimiter,
    addr: SocketAddr,
    request: Request,
    next: Next,
    tier: &str,
) -> Response {
    let client_ip = addr.ip().to_string();

    if !limiter.check(&client_ip) {
        tracing::warn!("Rate limit ({}) exceeded for IP: {}", tier, client_ip);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            views::render_error_page("Too many requests. Please wait a moment and try again."),
        )
            .into_response();
    }

    // Occasionally shed stale windows so the map stays small.
    if rand::random::<u8>() < 10 {
        limiter.cleanup_expired();
    }

    next.run(request).await
}

/// General tier applied to every route.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state.rate_limiter, addr, request, next, "general").await
}

/// Stricter tier for message submission, which fans out into model calls.
pub async fn chat_rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state.chat_rate_limiter, addr, request, next, "chat").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_fills_then_blocks() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));

        // Other clients have their own windows.
        assert!(limiter.check("5.6.7.8"));
    }

    #[test]
    fn cleanup_keeps_active_windows() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check("1.2.3.4"));
        limiter.cleanup_expired();
        // Still inside the window, so the count survives cleanup.
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));
    }
}
