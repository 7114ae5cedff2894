// src/error.rs
use crate::ollama_client::OllamaError;
use thiserror::Error;

/// Application-level error taxonomy. Handlers switch over these kinds:
/// validation problems render inline on the chat view, persistence problems
/// render the generic error page (or a JSON envelope on API routes), and
/// Ollama problems carry their own user-facing copy.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Ollama(#[from] OllamaError),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Database(e.to_string())
    }
}
