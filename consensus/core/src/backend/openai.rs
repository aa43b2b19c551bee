//! OpenAI-Compatible Client
//!
//! Talks to any gateway exposing the OpenAI `/chat/completions` API.
//! OpenRouter is the default: one key reaches every vendor's models, and the
//! model identity string doubles as the wire model name
//! (`anthropic/claude-3.7-sonnet:thinking`).
//!
//! The instructions travel as the system message and the document as the
//! single user message. The reply's first choice is returned verbatim.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{build_http_client, excerpt, status_error, transport_error};
use super::traits::{ClientError, ModelClient, ModelRequest};

/// Default OpenRouter endpoint
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Client for OpenAI-compatible chat completion APIs
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    /// Provider label for logs
    name: String,
    /// Base URL without the trailing `/chat/completions`
    base_url: String,
    /// Bearer token; `None` makes every call fail with an auth error
    api_key: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleClient {
    /// Create a client for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            http_client: build_http_client(connect_timeout)?,
        })
    }

    /// Create a client for OpenRouter
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the HTTP client cannot be built.
    pub fn openrouter(api_key: Option<String>) -> Result<Self, ClientError> {
        Self::new(
            "OpenRouter",
            OPENROUTER_BASE_URL,
            api_key,
            Duration::from_secs(10),
        )
    }

    /// Completions endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the JSON body for a request
    fn build_body<'a>(request: &'a ModelRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.instructions.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.instructions,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.document.as_str(),
        });

        ChatRequest {
            model: &request.wire_model,
            messages,
            temperature: request.temperature,
            max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
        }
    }
}

/// Extract the completion text from a response body
///
/// Some gateways report failures inside a 200 response as an `error`
/// object; those are backend errors, not malformed responses.
fn parse_completion(body: &str) -> Result<String, ClientError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ClientError::MalformedResponse(format!("invalid JSON ({e}): {}", excerpt(body)))
    })?;

    if let Some(error) = parsed.error {
        let status = error
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok());
        return Err(ClientError::Backend {
            status,
            message: error.message,
        });
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| ClientError::MalformedResponse("no content in response".to_string()))
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<String, ClientError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ClientError::Config(format!(
                "no API key configured for {}",
                self.name
            )));
        };

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        parse_completion(&body)
    }
}
