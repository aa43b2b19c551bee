//! LLM Backend Integration
//!
//! Every language-model call in the pipeline goes through the
//! [`ModelClient`] trait. Provider implementations:
//!
//! - **OpenAI-compatible**: `/chat/completions` gateways (OpenRouter by default)
//! - **Ollama**: local LLM server
//! - **Scripted**: in-process replies for tests and dry runs
//!
//! The [`ClientRegistry`] maps each [`ModelIdentity`](crate::model::ModelIdentity)
//! to the client instance that serves it. It is built once, when the
//! pipeline is constructed.
//!
//! # Usage
//!
//! ```ignore
//! use consensus_core::backend::{invoke_bounded, ModelRequest, OpenAiCompatibleClient};
//!
//! let client = OpenAiCompatibleClient::openrouter(Some(api_key))?;
//! let request = ModelRequest::new(model, document, "Edit for brevity");
//! let text = invoke_bounded(&client, &request, Duration::from_secs(300), None).await?;
//! ```

mod http;
mod ollama;
mod openai;
mod registry;
pub mod scripted;
mod traits;

use std::time::Duration;

use tokio::time::Instant;

pub use ollama::OllamaClient;
pub use openai::{OpenAiCompatibleClient, OPENROUTER_BASE_URL};
pub use registry::{ClientBinding, ClientRegistry};
pub use scripted::{Script, ScriptedClient};
pub use traits::{ClientError, ModelClient, ModelRequest};

/// Invoke a client with the per-call timeout and an optional hard deadline
///
/// The call is bounded by whichever of `timeout` (counted from now) and
/// `deadline` comes first. Blank documents are rejected before any network
/// traffic, and a blank reply is reported as a malformed response.
///
/// # Errors
///
/// Returns the client's own error, [`ClientError::Timeout`] when the bound
/// expires, [`ClientError::Config`] for a blank document, or
/// [`ClientError::MalformedResponse`] for a blank reply.
pub async fn invoke_bounded(
    client: &dyn ModelClient,
    request: &ModelRequest,
    timeout: Duration,
    deadline: Option<Instant>,
) -> Result<String, ClientError> {
    if request.document.is_blank() {
        return Err(ClientError::Config("document is empty".to_string()));
    }

    let start = Instant::now();
    let limit = start + timeout;
    let until = deadline.map_or(limit, |d| d.min(limit));

    match tokio::time::timeout_at(until, client.invoke(request)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(ClientError::MalformedResponse(
            "backend returned an empty completion".to_string(),
        )),
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(until.saturating_duration_since(start))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorKind, ModelIdentity};

    fn request(doc: &str) -> ModelRequest {
        ModelRequest::new(
            ModelIdentity::parse("test/model").unwrap(),
            doc.into(),
            "edit",
        )
    }

    #[tokio::test]
    async fn test_blank_document_rejected() {
        let client = ScriptedClient::new(Script::Echo);
        let err = invoke_bounded(&client, &request("   "), Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_reply_is_malformed() {
        let client = ScriptedClient::new(Script::Reply("  \n".into()));
        let err = invoke_bounded(&client, &request("memo"), Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bound() {
        let client = ScriptedClient::new(Script::Delayed(
            Duration::from_secs(10),
            Box::new(Script::Echo),
        ));
        let err = invoke_bounded(&client, &request("memo"), Duration::from_secs(2), None)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Timeout(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_tighter_than_timeout() {
        let client = ScriptedClient::new(Script::Delayed(
            Duration::from_secs(10),
            Box::new(Script::Echo),
        ));
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = invoke_bounded(
            &client,
            &request("memo"),
            Duration::from_secs(5),
            Some(deadline),
        )
        .await
        .unwrap_err();
        assert_eq!(err, ClientError::Timeout(Duration::from_secs(1)));
    }
}
