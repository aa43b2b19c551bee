//! Consensus Core - Multi-Model Fan-Out and Consolidation
//!
//! This crate runs one document through several language models at once,
//! records what each produced and how long it took, then asks one further
//! model to merge the successful outputs into a single result. Every run is
//! kept as an immutable record.
//!
//! # Architecture
//!
//! ```text
//!                    Document + model set
//!                           │
//! ┌─────────────────────────┼──────────────────────────────────────┐
//! │                     Pipeline                                    │
//! │                         │                                       │
//! │   ┌─────────────────────┴─────────────────────┐                 │
//! │   │             FanOutScheduler               │  Dispatching    │
//! │   │  ┌────────┐  ┌────────┐      ┌────────┐   │                 │
//! │   │  │ model 1│  │ model 2│ ...  │ model N│   │                 │
//! │   │  └───┬────┘  └───┬────┘      └───┬────┘   │                 │
//! │   └──────┴───────────┴───────────────┴────────┘                 │
//! │                         │ [ModelResult] in dispatch order       │
//! │                   Consolidator                   Consolidating  │
//! │                         │                                       │
//! │                     RunRecord ──────► RunStore   Recording      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Pipeline`]: public entry point, drives one run end to end
//! - [`ModelClient`]: one language-model backend
//! - [`ClientRegistry`]: maps each [`ModelIdentity`] to its client
//! - [`RunRecord`]: everything a run produced
//! - [`RunStore`]: durable, write-once storage of run records
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use consensus_core::{load_config, FileRunStore, Pipeline, RunRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let store = Arc::new(FileRunStore::new(&config.store_dir));
//!     let pipeline = Pipeline::from_config(&config, store)?;
//!
//!     let record = pipeline
//!         .run(RunRequest::new(memo_text, config.default_models.clone())
//!             .with_instructions("Edit this section for clarity"))
//!         .await?;
//!
//!     println!("{}", record.consolidated.map(|d| d.to_string()).unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: model clients (OpenAI-compatible, Ollama, scripted) and registry
//! - [`config`]: TOML configuration with CLI/env/file/default priority
//! - [`consolidator`]: labelled-prompt synthesis over successful outputs
//! - [`fanout`]: bounded concurrent dispatch
//! - [`model`]: documents, identities, results and run records
//! - [`pipeline`]: the orchestrator and its progress events
//! - [`store`]: file and in-memory run stores

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod consolidator;
pub mod fanout;
pub mod model;
pub mod pipeline;
pub mod store;

// Re-exports for convenience
pub use backend::{
    invoke_bounded, ClientError, ClientRegistry, ModelClient, ModelRequest, OllamaClient,
    OpenAiCompatibleClient, Script, ScriptedClient,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendSettings, ConfigError,
    ConfigOverrides, ConfigSource, ConsensusConfig, ModelEntry,
};
pub use consolidator::{Consolidation, Consolidator};
pub use fanout::{DispatchError, FanOutScheduler};
pub use model::{
    Document, ErrorKind, Failure, InvalidIdentity, ModelIdentity, ModelResult, Outcome, RunId,
    RunRecord, RunSummary,
};
pub use pipeline::{Pipeline, PipelineError, PipelineEvent, PipelineStage, RunRequest};
pub use store::{FileRunStore, MemoryRunStore, RunStore, StoreError};
