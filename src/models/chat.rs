// src/models/chat.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message. The system prompt is a session-level field, so
/// there is no system role here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(role: &str) -> Option<Self> {
        match role {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A persisted conversation. `messages` is append-only and its insertion
/// order is the conversation history sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub system_prompt: String,
    pub selected_model: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, selected_model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            system_prompt: String::new(),
            selected_model: selected_model.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sidebar preview: first 50 chars of the first user message, or
    /// "New chat" when the user has not said anything yet.
    pub fn preview(&self) -> String {
        match self.messages.iter().find(|m| m.role == MessageRole::User) {
            Some(message) => {
                let content = message.content.trim();
                if content.chars().count() > 50 {
                    let truncated: String = content.chars().take(50).collect();
                    format!("{}...", truncated)
                } else {
                    content.to_string()
                }
            }
            None => "New chat".to_string(),
        }
    }
}

/// Listing shape returned by the session service and the sessions API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub preview: String,
    pub message_count: usize,
    pub last_message: Option<ChatMessage>,
    pub messages: Vec<ChatMessage>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_session(session: ChatSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            preview: session.preview(),
            message_count: session.messages.len(),
            last_message: session.messages.last().cloned(),
            updated_at: session.updated_at,
            messages: session.messages,
        }
    }
}

/// Server-generated session ids: 32 hex chars, which sits inside the
/// 10-50 alphanumeric format the validators accept.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
