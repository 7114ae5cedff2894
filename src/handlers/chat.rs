// src/handlers/chat.rs
//! Page routes and the response orchestration around them. There is no
//! stored "status" field anywhere: whether a session is still waiting on the
//! model is derived on every request from the message count and the role of
//! the last message, which keeps a crash or restart from wedging a session.

use crate::error::ChatError;
use crate::jobs;
use crate::middleware::rate_limit::chat_rate_limit_middleware;
use crate::models::chat::{generate_session_id, ChatSession, MessageRole};
use crate::services::chat_service::validate_session_id;
use crate::views::{self, ChatViewData};
use crate::AppState;
use axum::{
    extract::{Extension, Form, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn chat_routes() -> Router {
    // Message submission fans out into model calls, so it gets the strict
    // rate-limit tier on top of the general one.
    let submit = Router::new()
        .route("/chat", post(post_chat))
        .layer(axum::middleware::from_fn(chat_rate_limit_middleware));

    Router::new()
        .route("/", get(index))
        .route("/check-response/:session_id", get(check_response))
        .route("/system-prompt", post(update_system_prompt))
        .route("/model-selection", post(update_model_selection))
        .route("/sessions/:session_id/delete", post(delete_session))
        .merge(submit)
}

// ---------------------------------------------------------------------------
// Derived processing state
// ---------------------------------------------------------------------------

/// The reply has arrived when the count grew past what the client last saw
/// AND the newest message is the assistant's (the count alone could have
/// grown from a second user message).
fn response_is_complete(current: usize, expected: usize, last_is_assistant: bool) -> bool {
    current > expected && last_is_assistant
}

/// Count handed back to a still-waiting client. Clients that landed mid-flow
/// without a count converge to `current - 1` instead of polling against 0
/// forever.
fn poll_forward_count(expected: usize, current: usize) -> usize {
    expected.max(current.saturating_sub(1))
}

// ---------------------------------------------------------------------------
// View assembly
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RenderOpts {
    error: Option<String>,
    is_processing: bool,
    pending_message: Option<String>,
    response_complete: bool,
    expected_count: usize,
    /// Off for never-persisted sessions (the empty state) so reconciliation
    /// does not create a row as a side effect of rendering.
    skip_fallback_persist: bool,
}

/// Swap in the first available model when the session's choice is gone from
/// the live directory, and persist the swap so the next render is a no-op.
/// An empty directory is a legitimate degraded state and changes nothing.
async fn reconcile_model(
    state: &AppState,
    session: &mut ChatSession,
    available: &[String],
    persist: bool,
) {
    if available.is_empty() || available.iter().any(|name| *name == session.selected_model) {
        return;
    }

    let fallback = available[0].clone();
    tracing::info!(
        "Model '{}' not available for session {}, falling back to '{}'",
        session.selected_model,
        session.session_id,
        fallback
    );

    if persist {
        // Best effort: the render must proceed even if the write fails.
        if let Err(e) = state
            .chat_service
            .update_selected_model(&session.session_id, &fallback)
            .await
        {
            tracing::warn!(
                "Failed to persist model fallback for session {}: {}",
                session.session_id,
                e
            );
        }
    }

    session.selected_model = fallback;
}

async fn build_chat_view(
    state: &AppState,
    mut session: ChatSession,
    opts: RenderOpts,
) -> Result<ChatViewData, ChatError> {
    let available: Vec<String> = state
        .ollama
        .list_models()
        .await
        .into_iter()
        .map(|m| m.name)
        .collect();

    reconcile_model(state, &mut session, &available, !opts.skip_fallback_persist).await;

    let sessions = state.chat_service.list_sessions(None, None).await?;

    Ok(ChatViewData {
        session_id: session.session_id,
        messages: session.messages,
        error: opts.error,
        is_processing: opts.is_processing,
        pending_message: opts.pending_message,
        response_complete: opts.response_complete,
        expected_count: opts.expected_count,
        sessions,
        available_models: available,
        selected_model: session.selected_model,
        system_prompt: session.system_prompt,
        new_session_id: generate_session_id(),
        theme: "dark".to_string(),
    })
}

fn generic_error_page(error: ChatError) -> Response {
    tracing::error!("Rendering generic error page: {}", error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        views::render_error_page("An unexpected error occurred. Please try again."),
    )
        .into_response()
}

async fn render_session(state: &AppState, session: ChatSession, opts: RenderOpts) -> Response {
    match build_chat_view(state, session, opts).await {
        Ok(data) => views::render_chat_view(&data).into_response(),
        // Failure while building the page context has nowhere nicer to go.
        Err(e) => generic_error_page(e),
    }
}

/// Validation problems keep the user on the chat view, error banner on top,
/// sidebar intact. A second failure while assembling that view falls back to
/// the generic error page.
async fn render_inline_error(state: &AppState, session_id: &str, error: ChatError) -> Response {
    let (session, unpersisted) = if session_id_ok(state, session_id) {
        match state.chat_service.get_or_create(session_id).await {
            Ok(session) => (session, false),
            Err(e) => return generic_error_page(e),
        }
    } else {
        // No usable session context; show the error on a fresh, unpersisted
        // session instead of bouncing to a bare error page.
        let fresh = ChatSession::new(generate_session_id(), &state.config.default_model);
        (fresh, true)
    };

    let opts = RenderOpts {
        error: Some(error.to_string()),
        skip_fallback_persist: unpersisted,
        ..RenderOpts::default()
    };
    render_session(state, session, opts).await
}

fn session_id_ok(state: &AppState, session_id: &str) -> bool {
    validate_session_id(
        session_id,
        state.config.session_id_min_length,
        state.config.session_id_max_length,
    )
    .is_ok()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IndexQuery {
    session: Option<String>,
}

async fn index(
    Query(query): Query<IndexQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    let Some(session_id) = query.session else {
        // No session chosen: jump to the most recent one, or render the
        // empty state when nothing exists yet.
        return match state.chat_service.list_sessions(Some(1), None).await {
            Ok(summaries) => match summaries.first() {
                Some(most_recent) => {
                    Redirect::to(&format!("/?session={}", most_recent.session_id)).into_response()
                }
                None => {
                    let fresh = ChatSession::new(
                        generate_session_id(),
                        &state.config.default_model,
                    );
                    let opts = RenderOpts {
                        skip_fallback_persist: true,
                        ..RenderOpts::default()
                    };
                    render_session(&state, fresh, opts).await
                }
            },
            Err(e) => generic_error_page(e),
        };
    };

    if !session_id_ok(&state, &session_id) {
        // Malformed ids get a clean slate rather than an error.
        return Redirect::to(&format!("/?session={}", generate_session_id())).into_response();
    }

    match state.chat_service.get_or_create(&session_id).await {
        Ok(session) => render_session(&state, session, RenderOpts::default()).await,
        Err(e) if e.is_validation() => render_inline_error(&state, &session_id, e).await,
        Err(e) => generic_error_page(e),
    }
}

#[derive(Deserialize)]
struct ChatForm {
    message: String,
    session_id: String,
}

async fn post_chat(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<ChatForm>,
) -> Response {
    let session = match state
        .chat_service
        .append_message(&form.session_id, MessageRole::User, &form.message)
        .await
    {
        Ok(session) => session,
        Err(e) if e.is_validation() => {
            return render_inline_error(&state, &form.session_id, e).await;
        }
        Err(e) => return generic_error_page(e),
    };

    // Count at the moment of posting, user message included; polls compare
    // against this to notice the assistant's reply landing.
    let count_before_ai = session.messages.len();
    let pending_message = session.messages.last().map(|m| m.content.clone());

    let opts = RenderOpts {
        is_processing: true,
        pending_message,
        expected_count: count_before_ai,
        ..RenderOpts::default()
    };

    // Build the view BEFORE spawning: reconciliation inside has persisted
    // any model fallback, so the task never generates against a model the
    // directory already said is gone.
    let view = build_chat_view(&state, session, opts).await;

    jobs::spawn_completion(state.clone(), form.session_id.clone());

    match view {
        Ok(data) => views::render_chat_view(&data).into_response(),
        Err(e) => generic_error_page(e),
    }
}

#[derive(Deserialize)]
struct CheckQuery {
    count: Option<usize>,
}

async fn check_response(
    Path(session_id): Path<String>,
    Query(query): Query<CheckQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if !session_id_ok(&state, &session_id) {
        return Redirect::to("/").into_response();
    }

    let session = match state.chat_service.get_or_create(&session_id).await {
        Ok(session) => session,
        Err(e) if e.is_validation() => return render_inline_error(&state, &session_id, e).await,
        Err(e) => return generic_error_page(e),
    };

    let expected = query.count.unwrap_or(0);
    let current = session.messages.len();
    let last_is_assistant = session
        .messages
        .last()
        .map(|m| m.role == MessageRole::Assistant)
        .unwrap_or(false);

    let opts = if response_is_complete(current, expected, last_is_assistant) {
        RenderOpts {
            response_complete: true,
            ..RenderOpts::default()
        }
    } else {
        let pending_message = session
            .messages
            .last()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone());
        RenderOpts {
            is_processing: true,
            expected_count: poll_forward_count(expected, current),
            pending_message,
            ..RenderOpts::default()
        }
    };

    render_session(&state, session, opts).await
}

#[derive(Deserialize)]
struct SystemPromptForm {
    session_id: String,
    system_prompt: String,
}

async fn update_system_prompt(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<SystemPromptForm>,
) -> Response {
    match state
        .chat_service
        .update_system_prompt(&form.session_id, &form.system_prompt)
        .await
    {
        Ok(session) => {
            Redirect::to(&format!("/?session={}", session.session_id)).into_response()
        }
        Err(e) if e.is_validation() => render_inline_error(&state, &form.session_id, e).await,
        Err(e) => generic_error_page(e),
    }
}

#[derive(Deserialize)]
struct ModelSelectionForm {
    session_id: String,
    selected_model: String,
}

async fn update_model_selection(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<ModelSelectionForm>,
) -> Response {
    let wanted = form.selected_model.trim().to_string();

    // Unlike the service-level operation, this entry point takes raw client
    // input, so it does check the live directory before persisting.
    let available: Vec<String> = state
        .ollama
        .list_models()
        .await
        .into_iter()
        .map(|m| m.name)
        .collect();

    if available.is_empty() {
        let error = ChatError::validation(
            "No models are available. Pull one first, e.g. 'ollama pull llama3.2'.",
        );
        return render_inline_error(&state, &form.session_id, error).await;
    }

    if !available.iter().any(|name| *name == wanted) {
        let error =
            ChatError::validation(format!("Model '{}' is not available", wanted));
        return render_inline_error(&state, &form.session_id, error).await;
    }

    match state
        .chat_service
        .update_selected_model(&form.session_id, &wanted)
        .await
    {
        Ok(session) => {
            Redirect::to(&format!("/?session={}", session.session_id)).into_response()
        }
        Err(e) if e.is_validation() => render_inline_error(&state, &form.session_id, e).await,
        Err(e) => generic_error_page(e),
    }
}

async fn delete_session(
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    match state.chat_service.delete_session(&session_id).await {
        Ok(_) => {}
        // A malformed id names nothing deletable; just go home.
        Err(e) if e.is_validation() => return Redirect::to("/").into_response(),
        Err(e) => return generic_error_page(e),
    }

    match state.chat_service.list_sessions(Some(1), None).await {
        Ok(summaries) => match summaries.first() {
            Some(most_recent) => {
                Redirect::to(&format!("/?session={}", most_recent.session_id)).into_response()
            }
            None => Redirect::to("/").into_response(),
        },
        Err(e) => generic_error_page(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_requires_growth_and_an_assistant_tail() {
        // Count grew and the assistant spoke last: done.
        assert!(response_is_complete(3, 2, true));
        // Count grew but a user message is newest (double submit): not done.
        assert!(!response_is_complete(3, 2, false));
        // No growth yet.
        assert!(!response_is_complete(2, 2, true));
        assert!(!response_is_complete(2, 2, false));
    }

    #[test]
    fn poll_count_carries_forward_and_converges() {
        // Nothing new: the same expectation rides along to the next poll.
        assert_eq!(poll_forward_count(2, 2), 2);
        // Client without a count catches up to current - 1 instead of
        // looping on zero.
        assert_eq!(poll_forward_count(0, 5), 4);
        assert_eq!(poll_forward_count(0, 0), 0);
        // A stale-but-high expectation is never lowered.
        assert_eq!(poll_forward_count(7, 3), 7);
    }
}
