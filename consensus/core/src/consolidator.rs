//! Consolidator
//!
//! Merges the successful fan-out outputs into one document with a single
//! further model call. The prompt carries the original text followed by
//! every successful output, each labelled with the model that wrote it:
//!
//! ```text
//! ORIGINAL TEXT:
//!
//! <document>
//!
//! EDITED BY openai/gpt-4.1:
//!
//! <output>
//!
//! <synthesis directive>
//! ```
//!
//! Failed results are never shown to the consolidation model. With no
//! successes at all, the step is skipped and recorded as a `no_inputs`
//! failure without any call being made.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::{invoke_bounded, ClientBinding, ClientRegistry, ModelRequest};
use crate::fanout::DispatchError;
use crate::model::{Document, Failure, ModelIdentity, ModelResult};

/// Closing directive used when the caller supplies none
pub const DEFAULT_SYNTHESIS_DIRECTIVE: &str = "Based on these versions, create the optimal \
     final version that incorporates the best elements from each.";

/// What the consolidation step produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Consolidation {
    /// The merged document
    pub consolidated: Option<Document>,
    /// Why there is no merged document
    pub error: Option<Failure>,
    /// Duration of the call; absent when no call was made
    pub latency: Option<Duration>,
}

impl Consolidation {
    fn skipped() -> Self {
        Self {
            consolidated: None,
            error: Some(Failure::no_inputs()),
            latency: None,
        }
    }
}

/// Single-call synthesis over the successful outputs
#[derive(Clone, Debug)]
pub struct Consolidator {
    binding: ClientBinding,
    model: ModelIdentity,
    call_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl Consolidator {
    /// Create a consolidator calling `model` through `registry`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownModel`] if the registry has no client
    /// for `model`.
    pub fn new(registry: Arc<ClientRegistry>, model: ModelIdentity) -> Result<Self, DispatchError> {
        let Some(binding) = registry.get(&model).cloned() else {
            return Err(DispatchError::UnknownModel(model));
        };
        Ok(Self {
            binding,
            model,
            call_timeout: Duration::from_secs(300),
            max_tokens: 0,
            temperature: 0.7,
        })
    }

    /// Set the call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The consolidation model
    #[must_use]
    pub fn model(&self) -> &ModelIdentity {
        &self.model
    }

    /// Build the labelled prompt from the successful results
    ///
    /// Returns `None` when no result carries an output.
    #[must_use]
    pub fn build_prompt(
        document: &Document,
        results: &[ModelResult],
        directive: &str,
    ) -> Option<String> {
        let mut successes = results
            .iter()
            .filter_map(|r| r.output().map(|text| (&r.model, text)))
            .peekable();
        successes.peek()?;

        let mut prompt = format!("ORIGINAL TEXT:\n\n{document}\n\n");
        for (model, text) in successes {
            prompt.push_str(&format!("EDITED BY {model}:\n\n{text}\n\n"));
        }
        prompt.push_str(directive);
        Some(prompt)
    }

    /// Run the consolidation step
    ///
    /// Never fails: a skipped or failed call is reported inside the returned
    /// [`Consolidation`].
    pub async fn consolidate(
        &self,
        document: &Document,
        results: &[ModelResult],
        instructions: &str,
        directive: &str,
        deadline: Option<Instant>,
    ) -> Consolidation {
        let Some(prompt) = Self::build_prompt(document, results, directive) else {
            tracing::info!("No successful outputs; skipping consolidation");
            return Consolidation::skipped();
        };

        let request = ModelRequest::new(self.model.clone(), Document::from(prompt), instructions)
            .with_wire_model(self.binding.wire_model.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);

        let inputs = results.iter().filter(|r| r.is_success()).count();
        tracing::debug!(model = %self.model, inputs, "Consolidating");

        let start = Instant::now();
        let outcome =
            invoke_bounded(self.binding.client.as_ref(), &request, self.call_timeout, deadline)
                .await;
        let latency = start.elapsed();

        match outcome {
            Ok(text) => Consolidation {
                consolidated: Some(Document::from(text)),
                error: None,
                latency: Some(latency),
            },
            Err(err) => {
                tracing::warn!(
                    model = %self.model,
                    kind = %err.kind(),
                    error = %err,
                    "Consolidation failed"
                );
                Consolidation {
                    consolidated: None,
                    error: Some(err.to_failure()),
                    latency: Some(latency),
                }
            }
        }
    }
}
