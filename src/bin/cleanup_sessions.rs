// Operator maintenance: delete chat sessions that have not been touched for
// N days. Run it from cron or by hand; the server never triggers it.
//
//   cargo run --bin cleanup_sessions [days]
use ollama_chat::config::AppConfig;
use ollama_chat::db;
use ollama_chat::services::ChatService;
use ollama_chat::store::PgSessionStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::from_env();

    let Some(database_url) = config.database_url.clone() else {
        eprintln!("❌ DATABASE_URL must be set; the in-memory store has nothing to clean up.");
        std::process::exit(1);
    };

    let days = std::env::args()
        .nth(1)
        .map(|raw| {
            raw.parse::<i64>().unwrap_or_else(|_| {
                eprintln!("❌ '{}' is not a number of days", raw);
                std::process::exit(1);
            })
        })
        .unwrap_or(config.session_max_age_days);

    println!("🧹 OllamaChat - Session cleanup");
    println!("Removing sessions idle for {}+ days...", days.max(1));

    let pool = db::create_pool(&database_url).await?;
    let service = ChatService::new(Arc::new(PgSessionStore::new(pool)), config);

    let removed = service.cleanup_old_sessions(days).await?;
    println!("✅ Removed {} session(s)", removed);

    Ok(())
}
