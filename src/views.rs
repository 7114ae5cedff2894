// src/views.rs
//! HTML rendering for the no-JS pages. Every page is a full document; the
//! only "dynamic" behavior the client ever performs is following the meta
//! refresh on the processing view.

use crate::markdown::{escape_html, render_markdown};
use crate::models::chat::{MessageRole, SessionSummary};
use axum::response::Html;

/// Everything a chat page render needs. Built by the handlers, consumed
/// here; the shape mirrors what the orchestrator knows about a request.
pub struct ChatViewData {
    pub session_id: String,
    pub messages: Vec<crate::models::chat::ChatMessage>,
    pub error: Option<String>,
    pub is_processing: bool,
    pub pending_message: Option<String>,
    pub response_complete: bool,
    /// Message count the next poll should compare against.
    pub expected_count: usize,
    pub sessions: Vec<SessionSummary>,
    pub available_models: Vec<String>,
    pub selected_model: String,
    pub system_prompt: String,
    pub new_session_id: String,
    pub theme: String,
}

const STYLES: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body {
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
    background: #16213e;
    color: #e8e8e8;
    display: flex;
    min-height: 100vh;
}
.sidebar {
    width: 280px;
    background: #1a1a2e;
    border-right: 1px solid rgba(59, 130, 246, 0.3);
    padding: 1rem;
    flex-shrink: 0;
}
.sidebar h1 { font-size: 1.1rem; margin-bottom: 1rem; }
.sidebar .new-chat {
    display: block;
    text-align: center;
    background: #3b82f6;
    color: white;
    text-decoration: none;
    padding: 0.5rem;
    border-radius: 6px;
    margin-bottom: 1rem;
}
.session-item { display: flex; align-items: center; gap: 0.25rem; margin-bottom: 0.5rem; }
.session-item a {
    flex: 1;
    color: #e8e8e8;
    text-decoration: none;
    padding: 0.4rem 0.5rem;
    border-radius: 6px;
    font-size: 0.85rem;
    white-space: nowrap;
    overflow: hidden;
    text-overflow: ellipsis;
}
.session-item a:hover, .session-item a.active { background: rgba(59, 130, 246, 0.3); }
.session-item button {
    background: none;
    border: none;
    color: #6c757d;
    cursor: pointer;
}
.main { flex: 1; display: flex; flex-direction: column; max-width: 900px; padding: 1rem 2rem; }
.messages { flex: 1; }
.message { margin-bottom: 1rem; padding: 0.75rem 1rem; border-radius: 8px; max-width: 85%; }
.message.user { background: #3b82f6; color: white; margin-left: auto; }
.message.assistant { background: #1a1a2e; border: 1px solid rgba(59, 130, 246, 0.3); }
.message .role { font-size: 0.7rem; text-transform: uppercase; opacity: 0.7; margin-bottom: 0.25rem; }
.message pre { background: #0f1419; padding: 0.5rem; border-radius: 6px; overflow-x: auto; margin: 0.5rem 0; }
.error-banner {
    background: #7f1d1d;
    border: 1px solid #dc3545;
    color: #fecaca;
    padding: 0.75rem 1rem;
    border-radius: 8px;
    margin-bottom: 1rem;
}
.processing { color: #93c5fd; padding: 0.75rem 1rem; font-style: italic; }
.complete-note { color: #86efac; font-size: 0.8rem; padding: 0.25rem 1rem; }
form.chat-form { display: flex; gap: 0.5rem; margin-top: 1rem; }
form.chat-form textarea {
    flex: 1;
    background: #1a1a2e;
    border: 1px solid rgba(59, 130, 246, 0.3);
    border-radius: 8px;
    color: #e8e8e8;
    padding: 0.75rem;
    resize: vertical;
    min-height: 3rem;
}
button[type=submit] {
    background: #3b82f6;
    color: white;
    border: none;
    border-radius: 8px;
    padding: 0.5rem 1.25rem;
    cursor: pointer;
}
details.settings { margin-top: 1rem; font-size: 0.85rem; }
details.settings summary { cursor: pointer; color: #93c5fd; margin-bottom: 0.5rem; }
details.settings textarea, details.settings select {
    width: 100%;
    background: #1a1a2e;
    border: 1px solid rgba(59, 130, 246, 0.3);
    border-radius: 6px;
    color: #e8e8e8;
    padding: 0.5rem;
    margin-bottom: 0.5rem;
}
.empty-state { text-align: center; margin-top: 4rem; color: #6c757d; }
"#;

fn page_shell(title: &str, head_extra: &str, body: &str, theme: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en" data-theme="{theme}">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
{head_extra}<style>{STYLES}</style>
</head>
<body>
{body}
</body>
</html>"#,
    ))
}

pub fn render_chat_view(data: &ChatViewData) -> Html<String> {
    let head_extra = if data.is_processing {
        format!(
            "<meta http-equiv=\"refresh\" content=\"2;url=/check-response/{}?count={}\">\n",
            escape_html(&data.session_id),
            data.expected_count
        )
    } else {
        String::new()
    };

    let mut body = String::new();
    body.push_str(&render_sidebar(data));

    body.push_str("<div class=\"main\">\n");

    if let Some(error) = &data.error {
        body.push_str(&format!(
            "<div class=\"error-banner\">{}</div>\n",
            escape_html(error)
        ));
    }

    body.push_str("<div class=\"messages\">\n");
    if data.messages.is_empty() && !data.is_processing {
        body.push_str(
            "<div class=\"empty-state\"><p>Start a conversation below.</p></div>\n",
        );
    }
    for message in &data.messages {
        body.push_str(&render_message(message.role, &message.content));
    }

    // A pending message only needs echoing when it is not yet part of the
    // stored list (e.g. the append raced the render).
    if data.is_processing {
        if let Some(pending) = &data.pending_message {
            let already_rendered = data
                .messages
                .last()
                .map(|m| m.role == MessageRole::User && &m.content == pending)
                .unwrap_or(false);
            if !already_rendered {
                body.push_str(&render_message(MessageRole::User, pending));
            }
        }
        body.push_str("<div class=\"processing\">Thinking&hellip; this page refreshes automatically.</div>\n");
    }

    if data.response_complete {
        body.push_str("<div class=\"complete-note\">Response ready.</div>\n");
    }
    body.push_str("</div>\n");

    body.push_str(&render_chat_form(data));
    body.push_str(&render_settings(data));
    body.push_str("</div>\n");

    page_shell("💬 Ollama Chat", &head_extra, &body, &data.theme)
}

fn render_sidebar(data: &ChatViewData) -> String {
    let mut sidebar = String::from("<div class=\"sidebar\">\n<h1>💬 Ollama Chat</h1>\n");
    sidebar.push_str(&format!(
        "<a class=\"new-chat\" href=\"/?session={}\">+ New chat</a>\n",
        escape_html(&data.new_session_id)
    ));

    for summary in &data.sessions {
        let active = if summary.session_id == data.session_id {
            " class=\"active\""
        } else {
            ""
        };
        sidebar.push_str(&format!(
            concat!(
                "<div class=\"session-item\">",
                "<a{} href=\"/?session={}\">{}</a>",
                "<form method=\"post\" action=\"/sessions/{}/delete\">",
                "<button type=\"submit\" title=\"Delete\">&times;</button>",
                "</form></div>\n"
            ),
            active,
            escape_html(&summary.session_id),
            escape_html(&summary.preview),
            escape_html(&summary.session_id),
        ));
    }

    sidebar.push_str("</div>\n");
    sidebar
}

fn render_message(role: MessageRole, content: &str) -> String {
    let (class, label, rendered) = match role {
        MessageRole::User => ("user", "You", escape_html(content)),
        MessageRole::Assistant => ("assistant", "Assistant", render_markdown(content)),
    };
    format!(
        "<div class=\"message {}\"><div class=\"role\">{}</div>{}</div>\n",
        class, label, rendered
    )
}

fn render_chat_form(data: &ChatViewData) -> String {
    format!(
        concat!(
            "<form class=\"chat-form\" method=\"post\" action=\"/chat\">\n",
            "<input type=\"hidden\" name=\"session_id\" value=\"{}\">\n",
            "<textarea name=\"message\" placeholder=\"Send a message\" required></textarea>\n",
            "<button type=\"submit\">Send</button>\n",
            "</form>\n"
        ),
        escape_html(&data.session_id)
    )
}

fn render_settings(data: &ChatViewData) -> String {
    let mut settings = String::from("<details class=\"settings\">\n<summary>Settings</summary>\n");

    settings.push_str(&format!(
        concat!(
            "<form method=\"post\" action=\"/system-prompt\">\n",
            "<input type=\"hidden\" name=\"session_id\" value=\"{}\">\n",
            "<label>System prompt</label>\n",
            "<textarea name=\"system_prompt\" rows=\"3\">{}</textarea>\n",
            "<button type=\"submit\">Save prompt</button>\n",
            "</form>\n"
        ),
        escape_html(&data.session_id),
        escape_html(&data.system_prompt),
    ));

    if data.available_models.is_empty() {
        settings.push_str(
            "<p>No models available. Pull one first, e.g. <code>ollama pull llama3.2</code>.</p>\n",
        );
    } else {
        settings.push_str(&format!(
            concat!(
                "<form method=\"post\" action=\"/model-selection\">\n",
                "<input type=\"hidden\" name=\"session_id\" value=\"{}\">\n",
                "<label>Model</label>\n<select name=\"selected_model\">\n"
            ),
            escape_html(&data.session_id)
        ));
        for model in &data.available_models {
            let selected = if *model == data.selected_model {
                " selected"
            } else {
                ""
            };
            settings.push_str(&format!(
                "<option value=\"{}\"{}>{}</option>\n",
                escape_html(model),
                selected,
                escape_html(model)
            ));
        }
        settings.push_str("</select>\n<button type=\"submit\">Use model</button>\n</form>\n");
    }

    settings.push_str("</details>\n");
    settings
}

/// Generic error page for failures that have no chat context to render into.
pub fn render_error_page(message: &str) -> Html<String> {
    let body = format!(
        concat!(
            "<div class=\"main\" style=\"margin: 4rem auto;\">\n",
            "<h1>Something went wrong</h1>\n",
            "<p>{}</p>\n",
            "<p><a href=\"/\" style=\"color: #93c5fd;\">Back to chat</a></p>\n",
            "</div>\n"
        ),
        escape_html(message)
    );
    page_shell("💬 Ollama Chat - Error", "", &body, "dark")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;

    fn base_data() -> ChatViewData {
        ChatViewData {
            session_id: "abcdefghij".to_string(),
            messages: Vec::new(),
            error: None,
            is_processing: false,
            pending_message: None,
            response_complete: false,
            expected_count: 0,
            sessions: Vec::new(),
            available_models: vec!["llama3.2:latest".to_string()],
            selected_model: "llama3.2:latest".to_string(),
            system_prompt: String::new(),
            new_session_id: "k".repeat(32),
            theme: "dark".to_string(),
        }
    }

    #[test]
    fn processing_view_carries_the_poll_url() {
        let mut data = base_data();
        data.is_processing = true;
        data.expected_count = 2;

        let Html(html) = render_chat_view(&data);
        assert!(html.contains("check-response/abcdefghij?count=2"));
        assert!(html.contains("http-equiv=\"refresh\""));
    }

    #[test]
    fn idle_view_has_no_refresh() {
        let Html(html) = render_chat_view(&base_data());
        assert!(!html.contains("http-equiv=\"refresh\""));
    }

    #[test]
    fn user_content_is_escaped_and_assistant_content_is_rendered() {
        let mut data = base_data();
        data.messages.push(ChatMessage::new(
            MessageRole::User,
            "<script>alert(1)</script>",
        ));
        data.messages
            .push(ChatMessage::new(MessageRole::Assistant, "**bold** reply"));

        let Html(html) = render_chat_view(&data);
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn selected_model_is_marked_in_the_dropdown() {
        let mut data = base_data();
        data.available_models = vec!["a-model".to_string(), "b-model".to_string()];
        data.selected_model = "b-model".to_string();

        let Html(html) = render_chat_view(&data);
        assert!(html.contains("<option value=\"b-model\" selected>"));
    }

    #[test]
    fn inline_error_is_shown_in_the_banner() {
        let mut data = base_data();
        data.error = Some("Message cannot be empty".to_string());

        let Html(html) = render_chat_view(&data);
        assert!(html.contains("error-banner"));
        assert!(html.contains("Message cannot be empty"));
    }
}
