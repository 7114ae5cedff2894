use ollama_chat::config::AppConfig;
use ollama_chat::store::{MemorySessionStore, PgSessionStore, SharedSessionStore};
use ollama_chat::{build_router, db, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let config = AppConfig::from_env();

    // Pick the session store backend: PostgreSQL when configured, otherwise
    // an in-memory store so the app still works on a bare laptop.
    let store: SharedSessionStore = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL session store...");
            let pool = db::create_pool(url)
                .await
                .expect("Failed to create database pool.");
            tracing::info!("✅ PostgreSQL session store ready");
            Arc::new(PgSessionStore::new(pool))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set. Sessions will be kept in memory and lost on restart."
            );
            Arc::new(MemorySessionStore::new())
        }
    };

    let shared_state = Arc::new(AppState::new(config.clone(), store));

    tracing::info!(
        "Ollama runtime at {} (default model: {})",
        config.ollama_base_url,
        config.default_model
    );
    match shared_state.ollama.health_check().await {
        "connected" => tracing::info!("✅ Ollama is reachable"),
        _ => tracing::warn!(
            "❌ Ollama is not reachable yet. Start it with 'ollama serve'; the app will keep retrying per request."
        ),
    }

    let app = build_router(shared_state.clone());

    // ConnectInfo provides socket addresses for per-IP rate limiting
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .unwrap();
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,ollama_chat=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,ollama_chat=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        // Human-readable logging for development
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("💬 OllamaChat starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );
    tracing::info!("Log level: {}", log_level);

    let db_configured = std::env::var("DATABASE_URL").is_ok();
    tracing::info!(
        "Configuration - Database: {}, Session store: {}",
        if db_configured { "✅" } else { "❌" },
        if db_configured { "postgres" } else { "in-memory" }
    );

    Ok(())
}
