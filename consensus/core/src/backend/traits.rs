//! Model Client Traits
//!
//! Trait definitions for language-model backends. The pipeline only ever
//! talks to a [`ModelClient`]; each provider (OpenAI-compatible gateways,
//! Ollama, the in-process scripted client) implements it once.
//!
//! # Contract
//!
//! - One request in, raw text out. No streaming, no post-processing.
//! - Failures are typed ([`ClientError`]) so the scheduler can record them
//!   as data with a stable [`ErrorKind`].
//! - Clients keep no per-call state; the same instance serves concurrent
//!   calls for every model mapped to it.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::{Document, ErrorKind, Failure, ModelIdentity};

/// One call to one model
#[derive(Clone, Debug)]
pub struct ModelRequest {
    /// Identity the result is recorded under
    pub model: ModelIdentity,
    /// Backend-specific model name sent on the wire
    pub wire_model: String,
    /// The text to work on (user message)
    pub document: Document,
    /// Backend-agnostic instructions (system prompt)
    pub instructions: String,
    /// Maximum tokens in the response (0 = backend default)
    pub max_tokens: u32,
    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,
}

impl ModelRequest {
    /// Create a request; the wire model defaults to the identity string
    pub fn new(model: ModelIdentity, document: Document, instructions: impl Into<String>) -> Self {
        Self {
            wire_model: model.as_str().to_string(),
            model,
            document,
            instructions: instructions.into(),
            max_tokens: 0,
            temperature: 0.7,
        }
    }

    /// Set the backend-specific model name
    #[must_use]
    pub fn with_wire_model(mut self, wire_model: impl Into<String>) -> Self {
        self.wire_model = wire_model.into();
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }
}

/// Typed failure of a single model call
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Credentials rejected or missing
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Client is misconfigured (bad URL, empty document, ...)
    #[error("client configuration error: {0}")]
    Config(String),

    /// Could not reach the backend or the connection broke
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an error
    #[error("backend error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Backend {
        /// HTTP status, when there was one
        status: Option<u16>,
        /// Error text reported by the backend
        message: String,
    },

    /// The call did not settle in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered but the body was empty or unusable
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    /// Stable kind recorded on the run
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) | Self::Config(_) => ErrorKind::Auth,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }

    /// Convert into the failure stored on a result
    #[must_use]
    pub fn to_failure(&self) -> Failure {
        Failure::new(self.kind(), self.to_string())
    }
}

/// A language-model backend
///
/// Implement this trait to add a provider. Timeouts are enforced by the
/// caller (see [`super::invoke_bounded`]); implementations only need to map
/// their own failures onto [`ClientError`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider name for logs (e.g. "OpenRouter", "Ollama")
    fn provider(&self) -> &str;

    /// Send the request and return the backend's text verbatim
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_request_builder() {
        let model = ModelIdentity::parse("ollama/llama3.2").unwrap();
        let request = ModelRequest::new(model, "memo".into(), "Be concise")
            .with_wire_model("llama3.2")
            .with_max_tokens(4000)
            .with_temperature(3.0);

        assert_eq!(request.wire_model, "llama3.2");
        assert_eq!(request.max_tokens, 4000);
        assert!((request.temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(request.instructions, "Be concise");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ClientError::Auth("401".into()).kind(), ErrorKind::Auth);
        assert_eq!(ClientError::Config("no key".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            ClientError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ClientError::MalformedResponse("empty".into()).kind(),
            ErrorKind::MalformedResponse
        );
    }

    #[test]
    fn test_backend_error_display() {
        let err = ClientError::Backend {
            status: Some(429),
            message: "quota exceeded".into(),
        };
        assert_eq!(err.to_string(), "backend error (HTTP 429): quota exceeded");

        let err = ClientError::Backend {
            status: None,
            message: "model overloaded".into(),
        };
        assert_eq!(err.to_string(), "backend error: model overloaded");
        assert_eq!(err.to_failure().kind, ErrorKind::Backend);
    }
}
