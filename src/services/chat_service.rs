// src/services/chat_service.rs
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::models::chat::{ChatMessage, ChatSession, MessageRole, SessionSummary};
use crate::store::SharedSessionStore;
use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SESSION_ID_CHARS: Regex = Regex::new(r"^[a-zA-Z0-9]+$").unwrap();
}

/// Session id format check. Pure, no I/O.
pub fn validate_session_id(
    session_id: &str,
    min_len: usize,
    max_len: usize,
) -> Result<(), ChatError> {
    let len = session_id.len();
    if len < min_len || len > max_len || !SESSION_ID_CHARS.is_match(session_id) {
        return Err(ChatError::validation(format!(
            "Invalid session id: expected {}-{} alphanumeric characters",
            min_len, max_len
        )));
    }
    Ok(())
}

/// Message content check. Returns the trimmed content on success. Pure.
pub fn validate_message_content(content: &str, max_len: usize) -> Result<String, ChatError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ChatError::validation("Message cannot be empty"));
    }
    if trimmed.chars().count() > max_len {
        return Err(ChatError::validation(format!(
            "Message is too long (maximum {} characters)",
            max_len
        )));
    }
    Ok(trimmed.to_string())
}

/// All validation and mutation of chat sessions goes through here. The
/// service never talks to the model runtime; model availability is the
/// caller's concern.
#[derive(Clone)]
pub struct ChatService {
    store: SharedSessionStore,
    config: AppConfig,
}

impl ChatService {
    pub fn new(store: SharedSessionStore, config: AppConfig) -> Self {
        Self { store, config }
    }

    fn check_session_id(&self, session_id: &str) -> Result<(), ChatError> {
        validate_session_id(
            session_id,
            self.config.session_id_min_length,
            self.config.session_id_max_length,
        )
    }

    async fn reload(&self, session_id: &str) -> Result<ChatSession, ChatError> {
        self.store.find_session(session_id).await?.ok_or_else(|| {
            ChatError::Database(format!("session {} disappeared mid-operation", session_id))
        })
    }

    /// Sessions created before model selection existed have no stored model;
    /// backfill it once on load. The write only happens when the field is
    /// actually empty, so repeated reads stay write-free.
    async fn normalize_loaded(&self, mut session: ChatSession) -> Result<ChatSession, ChatError> {
        if session.selected_model.trim().is_empty() {
            tracing::debug!(
                "Backfilling selected model for session {}",
                session.session_id
            );
            self.store
                .set_selected_model(&session.session_id, &self.config.default_model)
                .await?;
            session.selected_model = self.config.default_model.clone();
        }
        Ok(session)
    }

    pub async fn get_or_create(&self, session_id: &str) -> Result<ChatSession, ChatError> {
        self.check_session_id(session_id)?;

        if let Some(session) = self.store.find_session(session_id).await? {
            return self.normalize_loaded(session).await;
        }

        let session = ChatSession::new(session_id, &self.config.default_model);
        self.store.insert_session(&session).await?;
        tracing::info!("Created chat session {}", session_id);

        // Re-read so a concurrent creator's row wins over our local copy.
        match self.store.find_session(session_id).await? {
            Some(existing) => self.normalize_loaded(existing).await,
            None => Ok(session),
        }
    }

    /// Append one message and return the whole updated session; callers rely
    /// on the message list being current immediately after the append.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatSession, ChatError> {
        self.check_session_id(session_id)?;
        let content = validate_message_content(content, self.config.max_message_length)?;

        self.get_or_create(session_id).await?;
        let message = ChatMessage::new(role, content);
        self.store.append_message(session_id, &message).await?;

        self.reload(session_id).await
    }

    /// Empty (after trim) is a valid value and clears the prompt. Creates
    /// the session when it does not exist yet.
    pub async fn update_system_prompt(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<ChatSession, ChatError> {
        self.check_session_id(session_id)?;
        let trimmed = prompt.trim();
        if trimmed.chars().count() > self.config.max_system_prompt_length {
            return Err(ChatError::validation(format!(
                "System prompt is too long (maximum {} characters)",
                self.config.max_system_prompt_length
            )));
        }

        self.get_or_create(session_id).await?;
        self.store.set_system_prompt(session_id, trimmed).await?;
        self.reload(session_id).await
    }

    /// Pure persistence; availability against the model directory is checked
    /// by the caller before invoking this.
    pub async fn update_selected_model(
        &self,
        session_id: &str,
        model: &str,
    ) -> Result<ChatSession, ChatError> {
        self.check_session_id(session_id)?;
        let trimmed = model.trim();
        if trimmed.is_empty() {
            return Err(ChatError::validation("Model name cannot be empty"));
        }

        self.get_or_create(session_id).await?;
        self.store.set_selected_model(session_id, trimmed).await?;
        self.reload(session_id).await
    }

    /// Most recently updated first. `limit` is clamped to [1, 100] and
    /// `skip` to >= 0.
    pub async fn list_sessions(
        &self,
        limit: Option<i64>,
        skip: Option<i64>,
    ) -> Result<Vec<SessionSummary>, ChatError> {
        let limit = limit.unwrap_or(100).clamp(1, 100);
        let skip = skip.unwrap_or(0).max(0);

        let sessions = self.store.list_sessions(limit, skip).await?;
        Ok(sessions
            .into_iter()
            .map(SessionSummary::from_session)
            .collect())
    }

    /// Idempotent from the caller's view: false just means nothing matched.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ChatError> {
        self.check_session_id(session_id)?;
        let removed = self.store.delete_session(session_id).await?;
        if removed {
            tracing::info!("Deleted chat session {}", session_id);
        }
        Ok(removed)
    }

    /// Remove sessions untouched for `days_old` days (clamped to >= 1).
    /// Returns the exact number removed; skips the delete entirely when
    /// nothing qualifies.
    pub async fn cleanup_old_sessions(&self, days_old: i64) -> Result<u64, ChatError> {
        let days = days_old.max(1);
        let cutoff = Utc::now() - Duration::days(days);

        if self.store.count_sessions_older_than(cutoff).await? == 0 {
            return Ok(0);
        }

        let removed = self.store.delete_sessions_older_than(cutoff).await?;
        tracing::info!("Cleaned up {} session(s) older than {} day(s)", removed, days);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemorySessionStore, SessionStore};
    use std::sync::Arc;

    fn service() -> (ChatService, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let config = AppConfig::default();
        (ChatService::new(store.clone(), config), store)
    }

    #[test]
    fn session_id_format_is_enforced() {
        assert!(validate_session_id("abcdefghij", 10, 50).is_ok());
        assert!(validate_session_id(&"a".repeat(50), 10, 50).is_ok());
        assert!(validate_session_id("short", 10, 50).is_err());
        assert!(validate_session_id(&"a".repeat(51), 10, 50).is_err());
        assert!(validate_session_id("abcdef-ghij", 10, 50).is_err());
        assert!(validate_session_id("abcdefghi j", 10, 50).is_err());
        assert!(validate_session_id("", 10, 50).is_err());
    }

    #[test]
    fn message_content_is_trimmed_and_bounded() {
        assert_eq!(
            validate_message_content("  hello  ", 2000).unwrap(),
            "hello"
        );
        assert!(validate_message_content("   ", 2000).is_err());
        assert!(validate_message_content("", 2000).is_err());
        assert!(validate_message_content(&"x".repeat(2001), 2000).is_err());
        assert!(validate_message_content(&"x".repeat(2000), 2000).is_ok());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (service, _) = service();

        let first = service.get_or_create("abcdefghij").await.unwrap();
        let second = service.get_or_create("abcdefghij").await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.messages.len(), 0);
        assert_eq!(second.system_prompt, "");
        assert_eq!(second.selected_model, "llama3.2");
    }

    #[tokio::test]
    async fn get_or_create_rejects_bad_ids() {
        let (service, _) = service();
        assert!(service.get_or_create("short").await.unwrap_err().is_validation());
        assert!(service
            .get_or_create("has spaces!")
            .await
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn empty_model_is_backfilled_exactly_once() {
        let (service, store) = service();

        let legacy = ChatSession::new("abcdefghij", "");
        store.insert_session(&legacy).await.unwrap();

        let loaded = service.get_or_create("abcdefghij").await.unwrap();
        assert_eq!(loaded.selected_model, "llama3.2");

        // The backfill is persisted, so a second read must not write again.
        let persisted = store.find_session("abcdefghij").await.unwrap().unwrap();
        assert_eq!(persisted.selected_model, "llama3.2");
        let stamp = persisted.updated_at;

        let again = service.get_or_create("abcdefghij").await.unwrap();
        assert_eq!(again.selected_model, "llama3.2");
        let after = store.find_session("abcdefghij").await.unwrap().unwrap();
        assert_eq!(after.updated_at, stamp);
    }

    #[tokio::test]
    async fn append_stores_trimmed_content_and_returns_full_session() {
        let (service, _) = service();

        let session = service
            .append_message("abcdefghij", MessageRole::User, "  Hi there  ")
            .await
            .unwrap();

        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "Hi there");
        assert_eq!(session.messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let (service, _) = service();

        for content in ["m1", "m2", "m3"] {
            service
                .append_message("abcdefghij", MessageRole::User, content)
                .await
                .unwrap();
        }

        let session = service.get_or_create("abcdefghij").await.unwrap();
        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn rejected_append_does_not_touch_the_session() {
        let (service, store) = service();

        service
            .append_message("abcdefghij", MessageRole::User, "hello")
            .await
            .unwrap();
        let before = store.find_session("abcdefghij").await.unwrap().unwrap();

        let err = service
            .append_message("abcdefghij", MessageRole::User, "   ")
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let after = store.find_session("abcdefghij").await.unwrap().unwrap();
        assert_eq!(after.messages.len(), before.messages.len());
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn system_prompt_can_be_set_and_cleared() {
        let (service, _) = service();

        let session = service
            .update_system_prompt("abcdefghij", "  You are terse.  ")
            .await
            .unwrap();
        assert_eq!(session.system_prompt, "You are terse.");

        let cleared = service.update_system_prompt("abcdefghij", "").await.unwrap();
        assert_eq!(cleared.system_prompt, "");

        let err = service
            .update_system_prompt("abcdefghij", &"x".repeat(2001))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn system_prompt_update_creates_missing_sessions() {
        let (service, store) = service();

        service
            .update_system_prompt("freshsession", "Hello")
            .await
            .unwrap();
        assert!(store.find_session("freshsession").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn selected_model_update_requires_a_name() {
        let (service, _) = service();

        let session = service
            .update_selected_model("abcdefghij", " mistral:latest ")
            .await
            .unwrap();
        assert_eq!(session.selected_model, "mistral:latest");

        let err = service
            .update_selected_model("abcdefghij", "   ")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn list_sessions_orders_by_recency_and_builds_previews() {
        let (service, _) = service();

        service
            .append_message("aaaaaaaaaa", MessageRole::User, "first chat")
            .await
            .unwrap();
        service
            .append_message("bbbbbbbbbb", MessageRole::User, "second chat")
            .await
            .unwrap();
        service.get_or_create("cccccccccc").await.unwrap();

        let summaries = service.list_sessions(None, None).await.unwrap();
        assert_eq!(summaries.len(), 3);
        for pair in summaries.windows(2) {
            assert!(pair[0].updated_at >= pair[1].updated_at);
        }

        let by_id = |id: &str| summaries.iter().find(|s| s.session_id == id).unwrap();
        assert_eq!(by_id("aaaaaaaaaa").preview, "first chat");
        assert_eq!(by_id("aaaaaaaaaa").message_count, 1);
        assert_eq!(by_id("cccccccccc").preview, "New chat");
        assert!(by_id("cccccccccc").last_message.is_none());
    }

    #[tokio::test]
    async fn list_sessions_clamps_limit_and_skip() {
        let (service, _) = service();
        for id in ["aaaaaaaaaa", "bbbbbbbbbb", "cccccccccc"] {
            service.get_or_create(id).await.unwrap();
        }

        // limit below range is raised to 1, negative skip is treated as 0
        let one = service.list_sessions(Some(0), Some(-5)).await.unwrap();
        assert_eq!(one.len(), 1);

        let all = service.list_sessions(Some(1000), None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn delete_then_recreate_yields_a_fresh_session() {
        let (service, _) = service();

        service
            .append_message("abcdefghij", MessageRole::User, "remember me")
            .await
            .unwrap();

        assert!(service.delete_session("abcdefghij").await.unwrap());
        assert!(!service.delete_session("abcdefghij").await.unwrap());

        let recreated = service.get_or_create("abcdefghij").await.unwrap();
        assert!(recreated.messages.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_sessions_and_reports_count() {
        let (service, store) = service();
        let now = Utc::now();

        let mut stale = ChatSession::new("aaaaaaaaaa", "llama3.2");
        stale.updated_at = now - Duration::days(10);
        store.insert_session(&stale).await.unwrap();

        let mut fresh = ChatSession::new("bbbbbbbbbb", "llama3.2");
        fresh.updated_at = now - Duration::days(2);
        store.insert_session(&fresh).await.unwrap();

        assert_eq!(service.cleanup_old_sessions(7).await.unwrap(), 1);
        assert!(store.find_session("aaaaaaaaaa").await.unwrap().is_none());
        assert!(store.find_session("bbbbbbbbbb").await.unwrap().is_some());

        // Nothing stale left: returns zero without deleting anything.
        assert_eq!(service.cleanup_old_sessions(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_clamps_days_to_at_least_one() {
        let (service, store) = service();
        let now = Utc::now();

        let mut recent = ChatSession::new("aaaaaaaaaa", "llama3.2");
        recent.updated_at = now - chrono::Duration::hours(2);
        store.insert_session(&recent).await.unwrap();

        // days_old of 0 behaves like 1 day, so a 2-hour-old session stays.
        assert_eq!(service.cleanup_old_sessions(0).await.unwrap(), 0);
        assert!(store.find_session("aaaaaaaaaa").await.unwrap().is_some());
    }
}
