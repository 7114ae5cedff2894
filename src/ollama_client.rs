// src/ollama_client.rs
use crate::models::chat::{ChatMessage, MessageRole};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Model families tried, in order, when the configured default is not
/// available. Matching is case-insensitive substring against the names the
/// runtime reports.
const FALLBACK_MODEL_FAMILIES: &[&str] = &[
    "llama3.2", "llama3.1", "llama3", "llama2", "mistral", "gemma", "qwen", "phi",
];

/// Everything that can go wrong talking to Ollama, classified at the point
/// the HTTP call fails. The display strings are user-facing copy.
#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("The AI service is not reachable. Make sure Ollama is running (ollama serve).")]
    Unavailable,
    #[error("Model '{}' was not found{}", .model, format_available(.available))]
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },
    #[error("The AI request timed out.")]
    Timeout,
    #[error("No models are available. Pull one first, e.g. 'ollama pull llama3.2'.")]
    NoModelsAvailable,
    #[error("AI request failed: {0}")]
    CallFailed(String),
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(". Available models: {}", available.join(", "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    health_timeout: Duration,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        health_timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            request_timeout,
            health_timeout,
        }
    }

    /// List the models the runtime currently has. Best effort: any failure
    /// (connection, timeout, bad status, bad body) yields an empty list,
    /// because "no models" is a legitimate degraded state for callers.
    pub async fn list_models(&self) -> Vec<ModelInfo> {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                tracing::debug!("Failed to list Ollama models: {}", e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Ollama model listing returned {}", response.status());
            return Vec::new();
        }

        match response.json::<TagsResponse>().await {
            Ok(tags) => tags.models,
            Err(e) => {
                tracing::debug!("Failed to parse Ollama model listing: {}", e);
                Vec::new()
            }
        }
    }

    /// Pick a model to use given the configured default: the default first,
    /// then common model families, then whatever the directory lists first.
    pub async fn select_best_model(&self, preferred_default: &str) -> Result<String, OllamaError> {
        let names: Vec<String> = self
            .list_models()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        pick_preferred(&names, preferred_default).ok_or(OllamaError::NoModelsAvailable)
    }

    /// One blocking completion call: formats the conversation into a single
    /// prompt and POSTs it to /api/generate.
    pub async fn generate(
        &self,
        history: &[ChatMessage],
        model: &str,
        system_prompt: &str,
    ) -> Result<String, OllamaError> {
        let prompt = build_prompt(history, system_prompt);
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        tracing::debug!(
            "Sending completion request to Ollama: model={}, prompt_chars={}",
            model,
            prompt.len()
        );

        let response = match self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) if e.is_timeout() => return Err(OllamaError::Timeout),
            Err(e) if e.is_connect() => return Err(OllamaError::Unavailable),
            Err(e) => return Err(OllamaError::CallFailed(e.to_string())),
        };

        if response.status() == StatusCode::NOT_FOUND {
            // Enrich the error with what IS available so the user can fix
            // their selection without leaving the page.
            let available = self
                .list_models()
                .await
                .into_iter()
                .map(|m| m.name)
                .collect();
            return Err(OllamaError::ModelNotFound {
                model: model.to_string(),
                available,
            });
        }

        if !response.status().is_success() {
            return Err(OllamaError::CallFailed(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::CallFailed(format!("invalid response body: {}", e)))?;

        Ok(generated.response)
    }

    /// Fast reachability probe against the model listing endpoint. Never
    /// fails: any error at all maps to "disconnected".
    pub async fn health_check(&self) -> &'static str {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(res) if res.status().is_success() => "connected",
            _ => "disconnected",
        }
    }
}

/// Preference-ordered model pick. Pure so the ordering rules are testable
/// without a runtime.
pub fn pick_preferred(available: &[String], preferred_default: &str) -> Option<String> {
    if available.is_empty() {
        return None;
    }

    let mut preferences: Vec<&str> = Vec::with_capacity(FALLBACK_MODEL_FAMILIES.len() + 1);
    preferences.push(preferred_default);
    preferences.extend_from_slice(FALLBACK_MODEL_FAMILIES);

    for preferred in preferences {
        let wanted = preferred.trim().to_lowercase();
        if wanted.is_empty() {
            continue;
        }
        if let Some(name) = available
            .iter()
            .find(|name| name.to_lowercase().contains(&wanted))
        {
            return Some(name.clone());
        }
    }

    // Nothing preferred matched: take the directory's first entry as-is.
    Some(available[0].clone())
}

/// Render the conversation as a single prompt: optional system prompt, then
/// "User:"/"Assistant:" turns joined by blank lines, with a trailing
/// "Assistant:" cue for the model to continue from.
pub fn build_prompt(history: &[ChatMessage], system_prompt: &str) -> String {
    let mut sections: Vec<String> = Vec::new();

    let system_prompt = system_prompt.trim();
    if !system_prompt.is_empty() {
        sections.push(system_prompt.to_string());
    }

    for message in history {
        let speaker = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        sections.push(format!("{}: {}", speaker, message.content));
    }

    sections.push("Assistant:".to_string());
    sections.join("\n\n")
}
