//! Ollama Client
//!
//! Model client for Ollama (local LLM server), using the non-streaming
//! `/api/generate` endpoint. Instructions are prepended to the document as
//! a single prompt.

use std::time::Duration;

use async_trait::async_trait;

use super::http::{build_http_client, excerpt, status_error, transport_error};
use super::traits::{ClientError, ModelClient, ModelRequest};

/// Default sampling temperature; not sent when unchanged
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Ollama client
#[derive(Clone, Debug)]
pub struct OllamaClient {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ClientError> {
        Ok(Self {
            host: host.into(),
            port,
            http_client: build_http_client(Duration::from_secs(5))?,
        })
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    /// Build the full prompt: instructions, blank line, document
    fn build_prompt(request: &ModelRequest) -> String {
        let mut full_prompt = String::new();

        if !request.instructions.trim().is_empty() {
            full_prompt.push_str(&request.instructions);
            full_prompt.push_str("\n\n");
        }

        full_prompt.push_str(request.document.as_str());
        full_prompt
    }

    /// Build the JSON body for a request
    fn build_body(request: &ModelRequest) -> serde_json::Value {
        let mut json_request = serde_json::json!({
            "model": request.wire_model,
            "prompt": Self::build_prompt(request),
            "stream": false,
        });

        let mut options = serde_json::Map::new();
        if (request.temperature - DEFAULT_TEMPERATURE).abs() > f32::EPSILON {
            options.insert(
                "temperature".to_string(),
                serde_json::json!(request.temperature),
            );
        }
        if request.max_tokens > 0 {
            options.insert(
                "num_predict".to_string(),
                serde_json::json!(request.max_tokens),
            );
        }
        if !options.is_empty() {
            json_request["options"] = serde_json::Value::Object(options);
        }

        json_request
    }
}

/// Extract the generated text from a response body
fn parse_generate(body: &str) -> Result<String, ClientError> {
    let data: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        ClientError::MalformedResponse(format!("invalid JSON ({e}): {}", excerpt(body)))
    })?;

    if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
        return Err(ClientError::Backend {
            status: None,
            message: error.to_string(),
        });
    }

    data.get("response")
        .and_then(|r| r.as_str())
        .map(String::from)
        .ok_or_else(|| ClientError::MalformedResponse("no response field".to_string()))
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn provider(&self) -> &str {
        "Ollama"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<String, ClientError> {
        let response = self
            .http_client
            .post(self.generate_url())
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        parse_generate(&body)
    }
}
