// src/store.rs
use crate::error::ChatError;
use crate::models::chat::{ChatMessage, ChatSession, MessageRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage seam for chat sessions. The service layer only ever talks to
/// this trait; the concrete backend is chosen at startup.
///
/// `append_message` must be atomic with respect to concurrent appends to the
/// same session (no read-modify-write of the whole message list).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn ping(&self) -> Result<(), ChatError>;
    async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, ChatError>;
    /// Insert if absent; a concurrent insert of the same id is not an error.
    async fn insert_session(&self, session: &ChatSession) -> Result<(), ChatError>;
    async fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError>;
    async fn set_system_prompt(&self, session_id: &str, prompt: &str) -> Result<(), ChatError>;
    async fn set_selected_model(&self, session_id: &str, model: &str) -> Result<(), ChatError>;
    /// Sessions ordered by `updated_at` descending, messages included.
    async fn list_sessions(&self, limit: i64, skip: i64) -> Result<Vec<ChatSession>, ChatError>;
    async fn delete_session(&self, session_id: &str) -> Result<bool, ChatError>;
    async fn count_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChatError>;
    async fn delete_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChatError>;
    fn backend_name(&self) -> &'static str;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT role, content, created_at
             FROM chat_messages
             WHERE session_id = (SELECT id FROM chat_sessions WHERE session_id = $1)
             ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(|(role, content, created_at)| ChatMessage {
                role: MessageRole::from_str(&role).unwrap_or_else(|| {
                    tracing::warn!("Unknown message role '{}' in store, treating as user", role);
                    MessageRole::User
                }),
                content,
                created_at,
            })
            .collect();

        Ok(messages)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn ping(&self) -> Result<(), ChatError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, ChatError> {
        let row = sqlx::query_as::<_, (String, String, String, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT session_id, system_prompt, selected_model, created_at, updated_at
             FROM chat_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((session_id, system_prompt, selected_model, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let messages = self.fetch_messages(&session_id).await?;

        Ok(Some(ChatSession {
            session_id,
            system_prompt,
            selected_model,
            messages,
            created_at,
            updated_at,
        }))
    }

    async fn insert_session(&self, session: &ChatSession) -> Result<(), ChatError> {
        sqlx::query(
            "INSERT INTO chat_sessions (session_id, system_prompt, selected_model, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&session.session_id)
        .bind(&session.system_prompt)
        .bind(&session.selected_model)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError> {
        // The INSERT resolves the parent row itself, so an append is atomic
        // at the storage layer; no document rewrite, no lost updates between
        // concurrent completion tasks.
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, created_at)
             SELECT id, $2, $3, $4 FROM chat_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(ChatError::Database(format!(
                "session {} does not exist",
                session_id
            )));
        }

        sqlx::query("UPDATE chat_sessions SET updated_at = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_system_prompt(&self, session_id: &str, prompt: &str) -> Result<(), ChatError> {
        sqlx::query(
            "UPDATE chat_sessions SET system_prompt = $2, updated_at = NOW() WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_selected_model(&self, session_id: &str, model: &str) -> Result<(), ChatError> {
        sqlx::query(
            "UPDATE chat_sessions SET selected_model = $2, updated_at = NOW() WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(model)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_sessions(&self, limit: i64, skip: i64) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query_as::<_, (String, String, String, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT session_id, system_prompt, selected_model, created_at, updated_at
             FROM chat_sessions
             ORDER BY updated_at DESC
             LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for (session_id, system_prompt, selected_model, created_at, updated_at) in rows {
            let messages = self.fetch_messages(&session_id).await?;
            sessions.push(ChatSession {
                session_id,
                system_prompt,
                selected_model,
                messages,
                created_at,
                updated_at,
            });
        }

        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, ChatError> {
        // chat_messages rows go with the session via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM chat_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChatError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_sessions WHERE updated_at < $1")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChatError> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

// ---------------------------------------------------------------------------
// In-memory fallback (no DATABASE_URL) and test double
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ping(&self) -> Result<(), ChatError> {
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, ChatError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn insert_session(&self, session: &ChatSession) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session.session_id.clone())
            .or_insert_with(|| session.clone());
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or_else(|| {
            ChatError::Database(format!("session {} does not exist", session_id))
        })?;
        session.messages.push(message.clone());
        session.updated_at = message.created_at;
        Ok(())
    }

    async fn set_system_prompt(&self, session_id: &str, prompt: &str) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.system_prompt = prompt.to_string();
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_selected_model(&self, session_id: &str, model: &str) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.selected_model = model.to_string();
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_sessions(&self, limit: i64, skip: i64) -> Result<Vec<ChatSession>, ChatError> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<ChatSession> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, ChatError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn count_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChatError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().filter(|s| s.updated_at < cutoff).count() as u64)
    }

    async fn delete_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ChatError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        Ok((before - sessions.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(id: &str) -> ChatSession {
        ChatSession::new(id, "llama3.2")
    }

    #[tokio::test]
    async fn insert_is_first_writer_wins() {
        let store = MemorySessionStore::new();
        let mut first = session("abcdefghij");
        first.system_prompt = "keep me".to_string();
        store.insert_session(&first).await.unwrap();

        let second = session("abcdefghij");
        store.insert_session(&second).await.unwrap();

        let loaded = store.find_session("abcdefghij").await.unwrap().unwrap();
        assert_eq!(loaded.system_prompt, "keep me");
    }

    #[tokio::test]
    async fn append_preserves_order_and_bumps_updated_at() {
        let store = MemorySessionStore::new();
        store.insert_session(&session("abcdefghij")).await.unwrap();

        for content in ["one", "two", "three"] {
            store
                .append_message(
                    "abcdefghij",
                    &ChatMessage::new(MessageRole::User, content),
                )
                .await
                .unwrap();
        }

        let loaded = store.find_session("abcdefghij").await.unwrap().unwrap();
        let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(loaded.updated_at, loaded.messages.last().unwrap().created_at);
    }

    #[tokio::test]
    async fn append_to_missing_session_is_an_error() {
        let store = MemorySessionStore::new();
        let err = store
            .append_message("nosuchsession", &ChatMessage::new(MessageRole::User, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Database(_)));
    }

    #[tokio::test]
    async fn list_orders_by_recency_and_paginates() {
        let store = MemorySessionStore::new();
        let base = Utc::now();
        for (i, id) in ["aaaaaaaaaa", "bbbbbbbbbb", "cccccccccc"].iter().enumerate() {
            let mut s = session(id);
            s.updated_at = base + Duration::seconds(i as i64);
            store.insert_session(&s).await.unwrap();
        }

        let listed = store.list_sessions(10, 0).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["cccccccccc", "bbbbbbbbbb", "aaaaaaaaaa"]);

        let page = store.list_sessions(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].session_id, "bbbbbbbbbb");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemorySessionStore::new();
        store.insert_session(&session("abcdefghij")).await.unwrap();

        assert!(store.delete_session("abcdefghij").await.unwrap());
        assert!(!store.delete_session("abcdefghij").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_only_touches_stale_sessions() {
        let store = MemorySessionStore::new();
        let now = Utc::now();

        let mut stale = session("aaaaaaaaaa");
        stale.updated_at = now - Duration::days(10);
        store.insert_session(&stale).await.unwrap();

        let mut fresh = session("bbbbbbbbbb");
        fresh.updated_at = now - Duration::days(1);
        store.insert_session(&fresh).await.unwrap();

        let cutoff = now - Duration::days(7);
        assert_eq!(store.count_sessions_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(store.delete_sessions_older_than(cutoff).await.unwrap(), 1);
        assert!(store.find_session("aaaaaaaaaa").await.unwrap().is_none());
        assert!(store.find_session("bbbbbbbbbb").await.unwrap().is_some());
    }
}
