//! Fan-Out Scheduler
//!
//! Dispatches one document to every requested model concurrently and
//! collects exactly one [`ModelResult`] per model, in dispatch order.
//!
//! # Concurrency
//!
//! Each call runs as its own task on a [`JoinSet`]. A shared semaphore caps
//! the number of calls in flight; a call's latency is measured from the
//! moment it holds a permit, so queueing behind the cap is never charged to
//! the model. Every wait is bounded: permit acquisition by the run deadline,
//! the call itself by the per-call timeout and the run deadline.
//!
//! Results land in one slot per dispatched model. Each slot is written once,
//! by the completion of the task that owns it, and the slots are only read
//! after the join set has drained.
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = FanOutScheduler::new(registry, 6)
//!     .with_call_timeout(Duration::from_secs(300))
//!     .with_max_tokens(4000);
//!
//! let results = scheduler
//!     .dispatch(&document, &instructions, &models, deadline, None)
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::backend::{invoke_bounded, ClientRegistry, ModelRequest};
use crate::model::{Document, ErrorKind, Failure, ModelIdentity, ModelResult};
use crate::pipeline::PipelineEvent;

/// Caller errors detected before anything is dispatched
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No models were requested
    #[error("no models requested")]
    EmptyModelSet,

    /// The same model appears twice in one request
    #[error("model {0} requested more than once")]
    DuplicateModel(ModelIdentity),

    /// No client is registered for the model
    #[error("no client registered for model {0}")]
    UnknownModel(ModelIdentity),

    /// The document is empty or whitespace
    #[error("document is empty")]
    EmptyDocument,
}

/// Concurrent dispatcher over a [`ClientRegistry`]
#[derive(Clone, Debug)]
pub struct FanOutScheduler {
    registry: Arc<ClientRegistry>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    call_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl FanOutScheduler {
    /// Create a scheduler allowing at most `max_in_flight` concurrent calls
    ///
    /// A limit of zero is raised to one.
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            call_timeout: Duration::from_secs(300),
            max_tokens: 0,
            temperature: 0.7,
        }
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set max tokens per response
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

    /// Concurrency limit
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Per-call timeout
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// The registry calls are routed through
    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Check a request without dispatching it
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] for an empty document, an empty model set,
    /// a duplicated model or a model with no registered client.
    pub fn check(&self, document: &Document, models: &[ModelIdentity]) -> Result<(), DispatchError> {
        if document.is_blank() {
            return Err(DispatchError::EmptyDocument);
        }
        if models.is_empty() {
            return Err(DispatchError::EmptyModelSet);
        }

        let mut seen = HashSet::with_capacity(models.len());
        for model in models {
            if !seen.insert(model) {
                return Err(DispatchError::DuplicateModel(model.clone()));
            }
            if !self.registry.contains(model) {
                return Err(DispatchError::UnknownModel(model.clone()));
            }
        }
        Ok(())
    }

    /// Dispatch `document` to every model and wait for all calls to settle
    ///
    /// Per-model failures are returned as data; zero successes is still a
    /// completed dispatch. When `events` is given, a
    /// [`PipelineEvent::ModelSettled`] is sent as each call settles.
    ///
    /// # Errors
    ///
    /// Fails fast, before any call is issued, with the errors of
    /// [`Self::check`].
    pub async fn dispatch(
        &self,
        document: &Document,
        instructions: &str,
        models: &[ModelIdentity],
        deadline: Option<Instant>,
        events: Option<&UnboundedSender<PipelineEvent>>,
    ) -> Result<Vec<ModelResult>, DispatchError> {
        self.check(document, models)?;

        tracing::debug!(
            models = models.len(),
            max_in_flight = self.max_in_flight,
            doc_len = document.len(),
            "Dispatching document"
        );

        let mut tasks = JoinSet::new();
        let mut task_slots = HashMap::with_capacity(models.len());
        for (index, model) in models.iter().enumerate() {
            let binding = self
                .registry
                .get(model)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownModel(model.clone()))?;
            let request = ModelRequest::new(model.clone(), document.clone(), instructions)
                .with_wire_model(binding.wire_model)
                .with_max_tokens(self.max_tokens)
                .with_temperature(self.temperature);
            let client = binding.client;
            let permits = Arc::clone(&self.permits);
            let call_timeout = self.call_timeout;

            let handle = tasks.spawn(async move {
                let acquire = permits.acquire_owned();
                let permit = match deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, acquire).await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let failure = Failure::new(
                                ErrorKind::Timeout,
                                "deadline expired before the call was issued",
                            );
                            return (index, ModelResult::failure(request.model, failure, Duration::ZERO));
                        }
                    },
                    None => acquire.await,
                };
                let Ok(_permit) = permit else {
                    let failure = Failure::new(ErrorKind::Transport, "scheduler shut down");
                    return (index, ModelResult::failure(request.model, failure, Duration::ZERO));
                };

                let start = Instant::now();
                let outcome = AssertUnwindSafe(invoke_bounded(
                    client.as_ref(),
                    &request,
                    call_timeout,
                    deadline,
                ))
                .catch_unwind()
                .await;
                let latency = start.elapsed();

                let result = match outcome {
                    Ok(Ok(text)) => ModelResult::success(request.model, Document::from(text), latency),
                    Ok(Err(err)) => ModelResult::failure(request.model, err.to_failure(), latency),
                    Err(_) => ModelResult::failure(
                        request.model,
                        Failure::new(ErrorKind::Backend, "client panicked during the call"),
                        latency,
                    ),
                };
                (index, result)
            });
            task_slots.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<ModelResult>> = vec![None; models.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            let (index, result) = match joined {
                Ok((_, settled)) => settled,
                Err(e) => {
                    let Some(&index) = task_slots.get(&e.id()) else {
                        tracing::warn!(error = %e, "Unknown fan-out task failed");
                        continue;
                    };
                    (index, join_failure(&models[index], &e))
                }
            };

            match result.error() {
                None => tracing::debug!(
                    model = %result.model,
                    latency_ms = result.latency.as_millis(),
                    "Model call succeeded"
                ),
                Some(failure) => tracing::warn!(
                    model = %result.model,
                    kind = %failure.kind,
                    error = %failure.message,
                    latency_ms = result.latency.as_millis(),
                    "Model call failed"
                ),
            }

            if let Some(tx) = events {
                let _ = tx.send(PipelineEvent::ModelSettled {
                    index,
                    result: result.clone(),
                });
            }

            debug_assert!(slots[index].is_none(), "slot {index} written twice");
            slots[index] = Some(result);
        }

        let results = slots
            .into_iter()
            .zip(models)
            .map(|(slot, model)| {
                slot.unwrap_or_else(|| {
                    ModelResult::failure(
                        model.clone(),
                        Failure::new(ErrorKind::Backend, "call task was lost"),
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        Ok(results)
    }
}

/// Result for a call whose task panicked outside the client or was aborted
fn join_failure(model: &ModelIdentity, err: &JoinError) -> ModelResult {
    ModelResult::failure(
        model.clone(),
        Failure::new(ErrorKind::Backend, format!("call task failed: {err}")),
        Duration::ZERO,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClientError, Script, ScriptedClient};
    use crate::pipeline::PipelineEvent;

    fn id(raw: &str) -> ModelIdentity {
        ModelIdentity::parse(raw).unwrap()
    }

    fn scheduler(client: ScriptedClient, models: &[&str], max_in_flight: usize) -> FanOutScheduler {
        let client = Arc::new(client);
        let mut registry = ClientRegistry::new();
        for model in models {
            registry.register(id(model), client.clone(), None);
        }
        FanOutScheduler::new(Arc::new(registry), max_in_flight)
            .with_call_timeout(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let s = scheduler(ScriptedClient::new(Script::Echo), &["t/a", "t/b"], 2);
        let doc = Document::new("memo");

        assert_eq!(
            s.dispatch(&doc, "", &[], None, None).await.unwrap_err(),
            DispatchError::EmptyModelSet
        );
        assert_eq!(
            s.dispatch(&doc, "", &[id("t/a"), id("t/a")], None, None)
                .await
                .unwrap_err(),
            DispatchError::DuplicateModel(id("t/a"))
        );
        assert_eq!(
            s.dispatch(&doc, "", &[id("t/zzz")], None, None)
                .await
                .unwrap_err(),
            DispatchError::UnknownModel(id("t/zzz"))
        );
        assert_eq!(
            s.dispatch(&Document::new(" \n"), "", &[id("t/a")], None, None)
                .await
                .unwrap_err(),
            DispatchError::EmptyDocument
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_dispatch_order() {
        let client = ScriptedClient::new(Script::Tagged)
            .with_model(
                id("t/a"),
                Script::Delayed(Duration::from_secs(3), Box::new(Script::Tagged)),
            )
            .with_model(
                id("t/b"),
                Script::Delayed(Duration::from_secs(1), Box::new(Script::Tagged)),
            );
        let s = scheduler(client, &["t/a", "t/b", "t/c"], 3);
        let models = [id("t/a"), id("t/b"), id("t/c")];

        let results = s
            .dispatch(&Document::new("memo"), "edit", &models, None, None)
            .await
            .unwrap();

        let order: Vec<_> = results.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(order, ["t/a", "t/b", "t/c"]);
        assert_eq!(results[0].output().unwrap().as_str(), "[t/a] memo");
        assert_eq!(results[0].latency, Duration::from_secs(3));
        assert_eq!(results[1].latency, Duration::from_secs(1));
        assert_eq!(results[2].latency, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_excludes_queueing() {
        let client = ScriptedClient::new(Script::Delayed(
            Duration::from_secs(2),
            Box::new(Script::Echo),
        ));
        let s = scheduler(client, &["t/a", "t/b", "t/c"], 1);
        let models = [id("t/a"), id("t/b"), id("t/c")];

        let start = Instant::now();
        let results = s
            .dispatch(&Document::new("memo"), "", &models, None, None)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(6));
        for result in &results {
            assert!(result.is_success());
            assert_eq!(result.latency, Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_permit_wait() {
        let client = ScriptedClient::new(Script::Delayed(
            Duration::from_secs(5),
            Box::new(Script::Echo),
        ));
        let s = scheduler(client, &["t/a", "t/b"], 1);
        let deadline = Instant::now() + Duration::from_secs(1);

        let results = s
            .dispatch(&Document::new("memo"), "", &[id("t/a"), id("t/b")], Some(deadline), None)
            .await
            .unwrap();

        assert!(results
            .iter()
            .all(|r| r.error().map(|f| f.kind) == Some(ErrorKind::Timeout)));
        assert_eq!(Instant::now(), deadline);
    }

    #[tokio::test]
    async fn test_panicking_client_is_isolated() {
        let client = ScriptedClient::new(Script::Echo)
            .with_model(id("t/boom"), Script::Panic)
            .with_model(
                id("t/down"),
                Script::Fail(ClientError::Transport("connection reset".into())),
            );
        let s = scheduler(client, &["t/ok", "t/boom", "t/down"], 3);

        let results = s
            .dispatch(
                &Document::new("memo"),
                "",
                &[id("t/ok"), id("t/boom"), id("t/down")],
                None,
                None,
            )
            .await
            .unwrap();

        assert!(results[0].is_success());
        assert_eq!(results[1].error().unwrap().kind, ErrorKind::Backend);
        assert_eq!(results[2].error().unwrap().kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_failed_task_is_backend_failure() {
        let mut tasks = JoinSet::new();
        let handle = tasks.spawn(async { panic!("task blew up") });
        let err = tasks.join_next_with_id().await.unwrap().unwrap_err();
        assert_eq!(err.id(), handle.id());

        let result = join_failure(&id("t/a"), &err);
        let failure = result.error().unwrap();
        assert_eq!(result.model, id("t/a"));
        assert_eq!(failure.kind, ErrorKind::Backend);
        assert!(failure.message.starts_with("call task failed"));
        assert_eq!(result.latency, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_settled_events() {
        let s = scheduler(ScriptedClient::new(Script::Echo), &["t/a", "t/b"], 2);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        s.dispatch(&Document::new("memo"), "", &[id("t/a"), id("t/b")], None, Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut settled = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::ModelSettled { index, .. } = event {
                settled.push(index);
            }
        }
        settled.sort_unstable();
        assert_eq!(settled, [0, 1]);
    }
}
