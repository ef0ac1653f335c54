//! Hosted chat model backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Sampling temperature used for every request.
pub const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("chat API returned no text")]
    EmptyResponse,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn submit_prompt(&self, messages: &[Message]) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub temperature: f32,
}

pub struct GeminiChat {
    client: reqwest::Client,
    base_url: String,
    cfg: GeminiConfig,
}

impl GeminiChat {
    pub fn new(cfg: GeminiConfig) -> Self {
        Self::with_base_url(cfg, DEFAULT_GEMINI_URL)
    }

    pub fn with_base_url(cfg: GeminiConfig, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            cfg,
        }
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let mut system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !self.cfg.language.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&format!("Respond in the {} language.", self.cfg.language));
        }

        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": { "temperature": self.cfg.temperature },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn submit_prompt(&self, messages: &[Message]) -> Result<String, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.cfg.model
        );
        tracing::debug!(model = %self.cfg.model, messages = messages.len(), "submitting prompt");

        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&self.request_body(messages))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = resp.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}
