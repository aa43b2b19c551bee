//! Run Record Store
//!
//! Durable home of completed [`RunRecord`]s. A record is written once by
//! [`RunStore::save`] and never changed afterwards: there is no update and
//! no delete, and saving an id that already exists fails.
//!
//! Two implementations:
//!
//! - [`FileRunStore`]: one pretty-printed JSON file per run plus an
//!   append-only `index.jsonl` of summaries
//! - [`MemoryRunStore`]: in-process map, for tests and `--no-save` runs

mod file;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{RunId, RunRecord, RunSummary};

pub use file::FileRunStore;
pub use memory::MemoryRunStore;

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record has this id
    #[error("run {0} not found")]
    NotFound(RunId),

    /// A record with this id was already saved
    #[error("run {0} already exists")]
    AlreadyExists(RunId),

    /// The id cannot be used as a storage key
    #[error("invalid run id {0:?}")]
    InvalidId(RunId),

    /// Filesystem failure
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence for run records
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a record; the only point of durability
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the id was saved before, otherwise
    /// an I/O or serialization error.
    async fn save(&self, record: &RunRecord) -> Result<RunId, StoreError>;

    /// Fetch a record by id
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for an unknown id, distinct from I/O and
    /// serialization failures.
    async fn get(&self, id: &RunId) -> Result<RunRecord, StoreError>;

    /// Summaries of every saved run, oldest first
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listing cannot be read at all.
    async fn list(&self) -> Result<Vec<RunSummary>, StoreError>;
}

/// Sort summaries by creation time, breaking ties by id
pub(crate) fn sort_summaries(summaries: &mut [RunSummary]) {
    summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
