// src/config.rs
use std::time::Duration;

/// Runtime configuration, read from the environment once at startup and
/// injected into every component through `AppState` rather than looked up
/// ad hoc where it is needed.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// When unset the server falls back to the in-memory session store.
    pub database_url: Option<String>,
    pub ollama_base_url: String,
    pub default_model: String,
    pub ollama_timeout: Duration,
    pub health_check_timeout: Duration,
    pub max_message_length: usize,
    pub max_system_prompt_length: usize,
    pub session_id_min_length: usize,
    pub session_id_max_length: usize,
    /// Most-recent messages included in the prompt sent to Ollama.
    pub max_history_messages: usize,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub chat_rate_limit_max_requests: u32,
    pub session_max_age_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: None,
            ollama_base_url: "http://localhost:11434".to_string(),
            default_model: "llama3.2".to_string(),
            ollama_timeout: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(10),
            max_message_length: 2000,
            max_system_prompt_length: 2000,
            session_id_min_length: 10,
            session_id_max_length: 50,
            max_history_messages: 50,
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 60,
            chat_rate_limit_max_requests: 10,
            session_max_age_days: 7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            ollama_base_url: env_or("OLLAMA_BASE_URL", defaults.ollama_base_url),
            default_model: env_or("DEFAULT_MODEL", defaults.default_model),
            ollama_timeout: Duration::from_secs(env_parse(
                "OLLAMA_TIMEOUT_SECS",
                defaults.ollama_timeout.as_secs(),
            )),
            health_check_timeout: Duration::from_secs(env_parse(
                "OLLAMA_HEALTH_TIMEOUT_SECS",
                defaults.health_check_timeout.as_secs(),
            )),
            max_message_length: env_parse("MAX_MESSAGE_LENGTH", defaults.max_message_length),
            max_system_prompt_length: env_parse(
                "MAX_SYSTEM_PROMPT_LENGTH",
                defaults.max_system_prompt_length,
            ),
            session_id_min_length: env_parse(
                "SESSION_ID_MIN_LENGTH",
                defaults.session_id_min_length,
            ),
            session_id_max_length: env_parse(
                "SESSION_ID_MAX_LENGTH",
                defaults.session_id_max_length,
            ),
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES", defaults.max_history_messages),
            rate_limit_max_requests: env_parse(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            rate_limit_window_secs: env_parse(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window_secs,
            ),
            chat_rate_limit_max_requests: env_parse(
                "CHAT_RATE_LIMIT_MAX_REQUESTS",
                defaults.chat_rate_limit_max_requests,
            ),
            session_max_age_days: env_parse("SESSION_MAX_AGE_DAYS", defaults.session_max_age_days),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Invalid value '{}' for {}, using default", raw, key);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.ollama_base_url, "http://localhost:11434");
        assert_eq!(config.default_model, "llama3.2");
        assert_eq!(config.ollama_timeout, Duration::from_secs(60));
        assert_eq!(config.max_message_length, 2000);
        assert_eq!(config.session_id_min_length, 10);
        assert_eq!(config.session_id_max_length, 50);
        assert_eq!(config.session_max_age_days, 7);
    }
}
