// src/jobs.rs
//! Background completion tasks. A chat POST returns its page immediately and
//! the actual model call runs here, detached from the request. Tasks for the
//! same session are serialized through a per-session mutex so two quick
//! submissions queue instead of racing.

use crate::models::chat::{ChatMessage, MessageRole};
use crate::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Hands out one async mutex per session id. Holding the mutex means "a
/// completion for this session is in flight".
pub struct CompletionManager {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl CompletionManager {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(session_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// True while a completion task holds the session's lock.
    pub async fn is_generating(&self, session_id: &str) -> bool {
        let locks = self.locks.read().await;
        match locks.get(session_id) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Drop lock entries nobody holds or waits on, so the map does not grow
    /// with every session ever seen.
    pub async fn prune_idle(&self) {
        let mut locks = self.locks.write().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
    }
}

impl Default for CompletionManager {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedCompletionManager = Arc<CompletionManager>;

/// Fire-and-forget entry point used by the chat POST handler. The spawned
/// task owns everything it needs; it must not touch the originating request.
pub fn spawn_completion(state: Arc<AppState>, session_id: String) {
    tokio::spawn(async move {
        let lock = state
            .completion_manager
            .session_lock(&session_id)
            .await;
        let guard = lock.lock().await;

        run_completion(&state, &session_id).await;

        // Release our handles before pruning so this session's entry is
        // collectable too, not just older ones.
        drop(guard);
        drop(lock);
        state.completion_manager.prune_idle().await;
    });
}

/// One completion run. Whatever happens, an assistant message is appended:
/// a conversation with no reply ever arriving looks exactly like "still
/// processing" to a polling client and would poll forever.
pub async fn run_completion(state: &AppState, session_id: &str) {
    // Fetch fresh: the snapshot taken before spawning does not include the
    // message that triggered this task.
    let session = match state.chat_service.get_or_create(session_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(
                "Completion task could not load session {}: {}",
                session_id,
                e
            );
            append_reply(
                state,
                session_id,
                "Sorry, something went wrong while preparing the response. Please try again."
                    .to_string(),
            )
            .await;
            return;
        }
    };

    // Normally backfilled on load; if the field is still blank, ask the
    // directory for the best match instead of sending an empty model name.
    let model = if session.selected_model.trim().is_empty() {
        match state
            .ollama
            .select_best_model(&state.config.default_model)
            .await
        {
            Ok(model) => model,
            Err(e) => {
                append_reply(
                    state,
                    session_id,
                    format!("Sorry, I couldn't generate a response. {}", e),
                )
                .await;
                return;
            }
        }
    } else {
        session.selected_model.clone()
    };

    let history = history_tail(&session.messages, state.config.max_history_messages);

    let reply = match state
        .ollama
        .generate(history, &model, &session.system_prompt)
        .await
    {
        Ok(text) if !text.trim().is_empty() => {
            clip_reply(&text, state.config.max_message_length)
        }
        Ok(_) => {
            tracing::warn!("Ollama returned an empty completion for {}", session_id);
            "Sorry, the model returned an empty response. Please try again.".to_string()
        }
        Err(e) => {
            tracing::warn!("Completion failed for session {}: {}", session_id, e);
            format!("Sorry, I couldn't generate a response. {}", e)
        }
    };

    append_reply(state, session_id, reply).await;
}

async fn append_reply(state: &AppState, session_id: &str, reply: String) {
    if let Err(e) = state
        .chat_service
        .append_message(session_id, MessageRole::Assistant, &reply)
        .await
    {
        tracing::error!(
            "Failed to append assistant reply for session {}: {}",
            session_id,
            e
        );
        // Last attempt with minimal content; losing this too leaves the
        // conversation stuck in the eyes of a polling client.
        if let Err(e) = state
            .chat_service
            .append_message(
                session_id,
                MessageRole::Assistant,
                "Sorry, something went wrong while saving the response. Please try again.",
            )
            .await
        {
            tracing::error!(
                "Could not append any reply for session {}: {}",
                session_id,
                e
            );
        }
    }
}

/// Most-recent window of the conversation sent to the model. Storage is
/// never truncated, only the outbound prompt.
fn history_tail(messages: &[ChatMessage], max: usize) -> &[ChatMessage] {
    let start = messages.len().saturating_sub(max.max(1));
    &messages[start..]
}

/// Keep replies inside the stored message bound so the append cannot fail
/// validation. Truncation is on a char boundary.
fn clip_reply(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        trimmed.chars().take(max_chars).collect()
    }
}
