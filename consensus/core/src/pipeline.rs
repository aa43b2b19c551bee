//! Pipeline Orchestrator
//!
//! The public entry point. One call to [`Pipeline::run`] drives a document
//! through every stage and returns the completed [`RunRecord`]:
//!
//! ```text
//! Dispatching -> Consolidating -> Recording -> Complete
//! ```
//!
//! Stages are never re-entered. Per-model and consolidation failures are
//! data on the record; only caller errors (checked before dispatching) and
//! store failures fail a run, and a store failure still hands back the
//! assembled record.
//!
//! # Usage
//!
//! ```ignore
//! let config = load_config()?;
//! let store = Arc::new(FileRunStore::new(&config.store_dir));
//! let pipeline = Pipeline::from_config(&config, store)?;
//!
//! let record = pipeline
//!     .run(
//!         RunRequest::new(document, config.default_models.clone())
//!             .with_instructions(edit_prompt)
//!             .with_consolidation_instructions(merge_prompt)
//!             .with_deadline(Duration::from_secs(600)),
//!     )
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::backend::ClientRegistry;
use crate::config::{ConfigError, ConsensusConfig};
use crate::consolidator::{Consolidator, DEFAULT_SYNTHESIS_DIRECTIVE};
use crate::fanout::{DispatchError, FanOutScheduler};
use crate::model::{Document, ModelIdentity, ModelResult, RunId, RunRecord};
use crate::store::{RunStore, StoreError};

// ============================================================================
// Stages and Events
// ============================================================================

/// Stage of a pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Fan-out calls are in flight
    Dispatching,
    /// The consolidation call is in flight (or being skipped)
    Consolidating,
    /// The record is being assembled and saved
    Recording,
    /// The run is finished
    Complete,
}

impl PipelineStage {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Dispatching => "Dispatching to models...",
            Self::Consolidating => "Consolidating outputs...",
            Self::Recording => "Recording run...",
            Self::Complete => "Complete",
        }
    }
}

/// Progress notifications sent while a run executes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The run entered a new stage
    StageChanged(PipelineStage),
    /// One fan-out call settled
    ModelSettled {
        /// Position of the model in the request
        index: usize,
        /// The settled result
        result: ModelResult,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that fail a run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request was rejected before dispatching
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The pipeline could not be built from configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The run completed but its record could not be saved
    #[error("run {id} completed but could not be saved: {source}", id = .record.id)]
    Store {
        /// Store failure
        source: StoreError,
        /// The assembled record
        record: Box<RunRecord>,
    },
}

impl PipelineError {
    /// The assembled record, if the run got as far as recording
    #[must_use]
    pub fn record(&self) -> Option<&RunRecord> {
        match self {
            Self::Store { record, .. } => Some(record.as_ref()),
            _ => None,
        }
    }

    /// Take the assembled record out of the error
    #[must_use]
    pub fn into_record(self) -> Option<RunRecord> {
        match self {
            Self::Store { record, .. } => Some(*record),
            _ => None,
        }
    }
}

// ============================================================================
// Run Request
// ============================================================================

/// Everything the caller supplies for one run
#[derive(Clone, Debug)]
pub struct RunRequest {
    document: Document,
    models: Vec<ModelIdentity>,
    instructions: String,
    consolidation_instructions: String,
    synthesis_directive: Option<String>,
    deadline: Option<Duration>,
    label: Option<String>,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl RunRequest {
    /// Start a request for `document` fanned out to `models`
    pub fn new(document: impl Into<Document>, models: Vec<ModelIdentity>) -> Self {
        Self {
            document: document.into(),
            models,
            instructions: String::new(),
            consolidation_instructions: String::new(),
            synthesis_directive: None,
            deadline: None,
            label: None,
            events: None,
        }
    }

    /// Instructions sent to every fan-out model
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Instructions sent to the consolidation model
    #[must_use]
    pub fn with_consolidation_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.consolidation_instructions = instructions.into();
        self
    }

    /// Closing line of the consolidation prompt
    #[must_use]
    pub fn with_synthesis_directive(mut self, directive: impl Into<String>) -> Self {
        self.synthesis_directive = Some(directive.into());
        self
    }

    /// Hard deadline for the whole run, counted from the start of `run`
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Label stored on the record
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Channel receiving [`PipelineEvent`]s
    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The document
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The models, in dispatch order
    #[must_use]
    pub fn models(&self) -> &[ModelIdentity] {
        &self.models
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Fan-out, consolidate, record
pub struct Pipeline {
    scheduler: FanOutScheduler,
    consolidator: Consolidator,
    store: Arc<dyn RunStore>,
    default_deadline: Option<Duration>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("scheduler", &self.scheduler)
            .field("consolidator", &self.consolidator)
            .field("default_deadline", &self.default_deadline)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assemble a pipeline from its parts
    #[must_use]
    pub fn new(
        scheduler: FanOutScheduler,
        consolidator: Consolidator,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            scheduler,
            consolidator,
            store,
            default_deadline: None,
        }
    }

    /// Deadline applied to requests that carry none
    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Build a pipeline with clients created from the configuration
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a backend cannot be built, or
    /// [`PipelineError::Dispatch`] if the consolidation model has no client.
    pub fn from_config(
        config: &ConsensusConfig,
        store: Arc<dyn RunStore>,
    ) -> Result<Self, PipelineError> {
        let registry = ClientRegistry::from_config(config)?;
        Self::with_registry(config, registry, store)
    }

    /// Build a pipeline over an existing registry, taking limits and
    /// models from the configuration
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Dispatch`] if the consolidation model has no
    /// client in `registry`.
    pub fn with_registry(
        config: &ConsensusConfig,
        registry: ClientRegistry,
        store: Arc<dyn RunStore>,
    ) -> Result<Self, PipelineError> {
        let registry = Arc::new(registry);
        let scheduler = FanOutScheduler::new(Arc::clone(&registry), config.max_in_flight)
            .with_call_timeout(config.call_timeout)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);
        let consolidator = Consolidator::new(registry, config.consolidation_model.clone())?
            .with_call_timeout(config.call_timeout)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);

        let mut pipeline = Self::new(scheduler, consolidator, store);
        pipeline.default_deadline = config.run_deadline;
        Ok(pipeline)
    }

    /// The store records are saved to; exposes `get` and `list`
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// The consolidation model
    #[must_use]
    pub fn consolidation_model(&self) -> &ModelIdentity {
        self.consolidator.model()
    }

    /// Execute one run
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Dispatch`] if the request is rejected; nothing is
    ///   dispatched or saved in that case
    /// - [`PipelineError::Store`] if saving fails; the error carries the
    ///   complete record
    pub async fn run(&self, request: RunRequest) -> Result<RunRecord, PipelineError> {
        self.scheduler.check(&request.document, &request.models)?;

        let created_at = Utc::now();
        let started = Instant::now();
        let id = RunId::generate(created_at);
        let deadline = request
            .deadline
            .or(self.default_deadline)
            .map(|d| started + d);

        tracing::info!(
            id = %id,
            models = request.models.len(),
            label = request.label.as_deref().unwrap_or(""),
            deadline_secs = deadline.map(|d| d.duration_since(started).as_secs()),
            "Run started"
        );

        request.emit(PipelineEvent::StageChanged(PipelineStage::Dispatching));
        let results = self
            .scheduler
            .dispatch(
                &request.document,
                &request.instructions,
                &request.models,
                deadline,
                request.events.as_ref(),
            )
            .await?;

        request.emit(PipelineEvent::StageChanged(PipelineStage::Consolidating));
        let directive = request
            .synthesis_directive
            .as_deref()
            .unwrap_or(DEFAULT_SYNTHESIS_DIRECTIVE);
        let consolidation = self
            .consolidator
            .consolidate(
                &request.document,
                &results,
                &request.consolidation_instructions,
                directive,
                deadline,
            )
            .await;

        request.emit(PipelineEvent::StageChanged(PipelineStage::Recording));
        let record = RunRecord {
            id,
            created_at,
            label: request.label.clone(),
            input: request.document.clone(),
            results,
            consolidation_model: Some(self.consolidator.model().clone()),
            consolidated: consolidation.consolidated,
            consolidation_error: consolidation.error,
            consolidation_latency: consolidation.latency,
        };

        let saved = self.store.save(&record).await;
        request.emit(PipelineEvent::StageChanged(PipelineStage::Complete));

        match saved {
            Ok(_) => {
                tracing::info!(
                    id = %record.id,
                    successes = record.success_count(),
                    models = record.results.len(),
                    consolidated = record.consolidated.is_some(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Run complete"
                );
                Ok(record)
            }
            Err(source) => {
                tracing::warn!(id = %record.id, error = %source, "Run record could not be saved");
                Err(PipelineError::Store {
                    source,
                    record: Box::new(record),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Script, ScriptedClient};
    use crate::model::ErrorKind;
    use crate::store::MemoryRunStore;

    fn id(raw: &str) -> ModelIdentity {
        ModelIdentity::parse(raw).unwrap()
    }

    fn pipeline(client: ScriptedClient) -> (Pipeline, Arc<MemoryRunStore>) {
        let client = Arc::new(client);
        let registry = ClientRegistry::new()
            .with(id("t/a"), client.clone())
            .with(id("t/b"), client.clone())
            .with(id("t/final"), client);
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryRunStore::new());
        let pipeline = Pipeline::new(
            FanOutScheduler::new(Arc::clone(&registry), 4),
            Consolidator::new(registry, id("t/final")).unwrap(),
            store.clone(),
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_stage_order() {
        let (pipeline, _) = pipeline(ScriptedClient::new(Script::Echo));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        pipeline
            .run(RunRequest::new("memo", vec![id("t/a"), id("t/b")]).with_events(tx))
            .await
            .unwrap();

        let mut stages = Vec::new();
        let mut settled = 0;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::StageChanged(stage) => stages.push(stage),
                PipelineEvent::ModelSettled { .. } => settled += 1,
            }
        }
        assert_eq!(
            stages,
            [
                PipelineStage::Dispatching,
                PipelineStage::Consolidating,
                PipelineStage::Recording,
                PipelineStage::Complete,
            ]
        );
        assert_eq!(settled, 2);
    }

    #[tokio::test]
    async fn test_rejected_request_saves_nothing() {
        let (pipeline, store) = pipeline(ScriptedClient::new(Script::Echo));

        let err = pipeline
            .run(RunRequest::new("memo", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(DispatchError::EmptyModelSet)));
        assert!(err.record().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_record_is_saved_with_label() {
        let (pipeline, store) = pipeline(
            ScriptedClient::new(Script::Tagged).with_model(id("t/final"), Script::Reply("merged".into())),
        );

        let record = pipeline
            .run(RunRequest::new("memo", vec![id("t/b"), id("t/a")]).with_label("Revenue Model"))
            .await
            .unwrap();

        assert_eq!(record.label.as_deref(), Some("Revenue Model"));
        assert_eq!(record.results[0].model, id("t/b"));
        assert_eq!(record.consolidated, Some(Document::new("merged")));
        assert_eq!(record.consolidation_model, Some(id("t/final")));
        assert_eq!(store.get(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_all_failed_still_records() {
        let (pipeline, store) = pipeline(ScriptedClient::new(Script::Fail(
            crate::backend::ClientError::Transport("refused".into()),
        )));

        let record = pipeline
            .run(RunRequest::new("memo", vec![id("t/a")]))
            .await
            .unwrap();

        assert_eq!(record.success_count(), 0);
        assert_eq!(
            record.consolidation_error.as_ref().map(|f| f.kind),
            Some(ErrorKind::NoInputs)
        );
        assert!(record.consolidation_latency.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_from_config_uses_defaults() {
        let config = ConsensusConfig::default();
        let pipeline =
            Pipeline::from_config(&config, Arc::new(MemoryRunStore::new())).unwrap();
        assert_eq!(pipeline.consolidation_model(), &config.consolidation_model);
        assert_eq!(pipeline.scheduler.max_in_flight(), 6);
    }
}
