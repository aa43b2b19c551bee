//! Scripted Client
//!
//! An in-process [`ModelClient`] whose replies are scripted per model. It
//! never touches the network, which makes it the client of choice for
//! tests and for `--dry-run` invocations of the CLI.
//!
//! # Usage
//!
//! ```ignore
//! let client = ScriptedClient::new(Script::Echo)
//!     .with_model(slow, Script::Delayed(Duration::from_secs(5), Box::new(Script::Echo)))
//!     .with_model(broken, Script::Fail(ClientError::Transport("reset".into())));
//!
//! // After the run, verify what each model received
//! assert_eq!(client.requests_for(&slow).len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{ClientError, ModelClient, ModelRequest};
use crate::model::ModelIdentity;

/// Scripted behaviour for one model
#[derive(Clone, Debug)]
pub enum Script {
    /// Reply with fixed text
    Reply(String),
    /// Reply with the document unchanged
    Echo,
    /// Reply with `[<model>] <document>`
    Tagged,
    /// Fail with the given error
    Fail(ClientError),
    /// Sleep, then behave like the inner script
    Delayed(Duration, Box<Script>),
    /// Panic inside the call
    Panic,
}

/// In-process client driven by [`Script`]s
#[derive(Debug)]
pub struct ScriptedClient {
    default: Script,
    per_model: HashMap<ModelIdentity, Script>,
    calls: AtomicUsize,
    history: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    /// Create a client where every model follows `default`
    #[must_use]
    pub fn new(default: Script) -> Self {
        Self {
            default,
            per_model: HashMap::new(),
            calls: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Override the script for one model
    #[must_use]
    pub fn with_model(mut self, model: ModelIdentity, script: Script) -> Self {
        self.per_model.insert(model, script);
        self
    }

    /// Total number of calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received for one model, in arrival order
    pub fn requests_for(&self, model: &ModelIdentity) -> Vec<ModelRequest> {
        self.history
            .lock()
            .iter()
            .filter(|r| &r.model == model)
            .cloned()
            .collect()
    }

    fn script_for(&self, model: &ModelIdentity) -> Script {
        self.per_model
            .get(model)
            .unwrap_or(&self.default)
            .clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn provider(&self) -> &str {
        "Scripted"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<String, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history.lock().push(request.clone());

        let mut script = self.script_for(&request.model);
        loop {
            match script {
                Script::Reply(text) => return Ok(text),
                Script::Echo => return Ok(request.document.as_str().to_string()),
                Script::Tagged => {
                    return Ok(format!("[{}] {}", request.model, request.document));
                }
                Script::Fail(err) => return Err(err),
                Script::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    script = *inner;
                }
                Script::Panic => panic!("scripted panic for {}", request.model),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_per_model_scripts() {
        let a = ModelIdentity::parse("test/a").unwrap();
        let b = ModelIdentity::parse("test/b").unwrap();
        let client = ScriptedClient::new(Script::Echo)
            .with_model(b.clone(), Script::Fail(ClientError::Auth("nope".into())));

        let ok = client
            .invoke(&ModelRequest::new(a.clone(), "memo".into(), ""))
            .await
            .unwrap();
        assert_eq!(ok, "memo");

        let err = client
            .invoke(&ModelRequest::new(b.clone(), "memo".into(), ""))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Auth("nope".into()));

        assert_eq!(client.call_count(), 2);
        assert_eq!(client.requests_for(&a).len(), 1);
        assert_eq!(client.requests_for(&b).len(), 1);
    }

    #[tokio::test]
    async fn test_tagged_reply() {
        let a = ModelIdentity::parse("test/a").unwrap();
        let client = ScriptedClient::new(Script::Tagged);
        let text = client
            .invoke(&ModelRequest::new(a, "memo".into(), ""))
            .await
            .unwrap();
        assert_eq!(text, "[test/a] memo");
    }
}
