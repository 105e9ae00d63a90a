//! Client for an OpenAI-compatible chat-completion API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;

/// What the user sees when no model produced an answer.
pub const FALLBACK_REPLY: &str =
    "Извините, сейчас не получается получить ответ. Попробуйте задать вопрос чуть позже или позвоните нам.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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
}

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub url: String,
    pub api_key: String,
    /// Tried in order until one returns a non-empty answer.
    pub models: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.completion_url.clone(),
            api_key: config.completion_api_key.clone(),
            models: config.models.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.request_timeout,
        }
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct CompletionClient {
    settings: CompletionSettings,
    http: reqwest::Client,
}

impl CompletionClient {
    pub fn new(settings: CompletionSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });
        Self { settings, http }
    }

    /// One request against one model.
    pub async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, Error> {
        let request = ApiRequest {
            model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let response = self
            .http
            .post(&self.settings.url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(300).collect();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Http(e.to_string())
            }
        })?;
        let api_response: ApiResponse =
            serde_json::from_str(&body).map_err(|e| Error::Parse(e.to_string()))?;

        let choice = api_response.choices.into_iter().next().ok_or(Error::NoChoices)?;
        let content = choice
            .message
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(Error::Empty);
        }
        Ok(content)
    }

    /// Ask each configured model in turn; never fails.
    pub async fn answer(&self, messages: &[ChatMessage]) -> String {
        for model in &self.settings.models {
            debug!("Asking {model}");
            match self.complete(model, messages).await {
                Ok(answer) => {
                    info!("🤖 {model} answered ({} chars)", answer.chars().count());
                    return answer;
                }
                Err(e) => warn!("Model {model} failed: {e}"),
            }
        }
        warn!("All {} models failed, sending fallback", self.settings.models.len());
        FALLBACK_REPLY.to_string()
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Timeout,
    Api(String),
    Parse(String),
    NoChoices,
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Timeout => write!(f, "Request timed out"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::NoChoices => write!(f, "No choices in response"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
