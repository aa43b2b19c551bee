//! File-backed run store
//!
//! Layout under the store directory:
//!
//! ```text
//! <dir>/runs/<id>.json   full record, pretty JSON
//! <dir>/index.jsonl      one RunSummary per line, append-only
//! ```
//!
//! A record is first written to a temporary file and then hard-linked into
//! place. Linking fails if the target exists, so a saved record can never be
//! overwritten, and readers never observe a partially written file. The
//! index entry is appended after the link; if that append fails the record
//! file is removed again, so a failed save can be retried.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{sort_summaries, RunStore, StoreError};
use crate::model::{RunId, RunRecord, RunSummary};

const RUNS_DIR: &str = "runs";
const INDEX_FILE: &str = "index.jsonl";

/// Run store writing JSON files under a directory
#[derive(Debug)]
pub struct FileRunStore {
    dir: PathBuf,
    /// Serializes index appends within this process
    index_lock: Mutex<()>,
}

impl FileRunStore {
    /// Create a store rooted at `dir`; directories are created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index_lock: Mutex::new(()),
        }
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn runs_dir(&self) -> PathBuf {
        self.dir.join(RUNS_DIR)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn record_path(&self, id: &RunId) -> Result<PathBuf, StoreError> {
        if !id.is_path_safe() {
            return Err(StoreError::InvalidId(id.clone()));
        }
        Ok(self.runs_dir().join(format!("{id}.json")))
    }

    async fn append_index(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(summary)?;
        line.push('\n');

        let _guard = self.index_lock.lock().await;
        let mut index = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path())
            .await?;
        index.write_all(line.as_bytes()).await?;
        index.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, record: &RunRecord) -> Result<RunId, StoreError> {
        let path = self.record_path(&record.id)?;
        let body = serde_json::to_vec_pretty(record)?;

        tokio::fs::create_dir_all(self.runs_dir()).await?;

        let tmp = self.runs_dir().join(format!(
            ".{}.{}.tmp",
            record.id,
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, &body).await?;

        let linked = tokio::fs::hard_link(&tmp, &path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            tracing::debug!(path = %tmp.display(), error = %e, "Failed to remove temp file");
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(record.id.clone()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        // Every record file has an index entry; undo the link otherwise
        if let Err(e) = self.append_index(&record.summary()).await {
            if let Err(unlink) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    id = %record.id,
                    error = %unlink,
                    "Failed to roll back unindexed record"
                );
            }
            return Err(e);
        }

        tracing::info!(
            id = %record.id,
            path = %path.display(),
            "Run record saved"
        );
        Ok(record.id.clone())
    }

    async fn get(&self, id: &RunId) -> Result<RunRecord, StoreError> {
        let path = self.record_path(id)?;
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(serde_json::from_slice(&body)?)
    }

    async fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let content = match tokio::fs::read_to_string(self.index_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut summaries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunSummary>(line) {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::warn!(
                    line = number + 1,
                    error = %e,
                    "Skipping corrupt index entry"
                ),
            }
        }

        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, ModelIdentity, ModelResult};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn record(id: &str, secs: i64) -> RunRecord {
        let model = ModelIdentity::parse("openai/gpt-4.1").unwrap();
        RunRecord {
            id: RunId::from(id),
            created_at: Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap(),
            label: Some("Market Research".into()),
            input: Document::new("raw memo"),
            results: vec![ModelResult::success(
                model.clone(),
                "edited".into(),
                Duration::from_millis(1234),
            )],
            consolidation_model: Some(model),
            consolidated: Some(Document::new("final")),
            consolidation_error: None,
            consolidation_latency: Some(Duration::from_millis(900)),
        }
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let original = record("run-1", 0);

        let id = store.save(&original).await.unwrap();
        assert_eq!(id, original.id);
        assert!(dir.path().join("runs").join("run-1.json").exists());

        let loaded = store.get(&id).await.unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_save_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        store.save(&record("run-1", 0)).await.unwrap();

        let mut changed = record("run-1", 0);
        changed.consolidated = Some(Document::new("tampered"));
        let err = store.save(&changed).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let loaded = store.get(&RunId::from("run-1")).await.unwrap();
        assert_eq!(loaded.consolidated, Some(Document::new("final")));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_index_append_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let index = dir.path().join("index.jsonl");
        std::fs::create_dir_all(&index).unwrap();

        let err = store.save(&record("run-1", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(matches!(
            store.get(&RunId::from("run-1")).await,
            Err(StoreError::NotFound(_))
        ));

        std::fs::remove_dir(&index).unwrap();
        let id = store.save(&record("run-1", 0)).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), record("run-1", 0));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn test_get_unknown_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());

        assert!(matches!(
            store.get(&RunId::from("missing")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get(&RunId::from("../escape")).await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("runs")).unwrap();
        std::fs::write(dir.path().join("runs").join("bad.json"), "{not json").unwrap();

        let store = FileRunStore::new(dir.path());
        assert!(matches!(
            store.get(&RunId::from("bad")).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_list_ordered_and_tolerant() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());

        store.save(&record("run-b", 20)).await.unwrap();
        store.save(&record("run-a", 10)).await.unwrap();

        let mut index = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("index.jsonl"))
            .unwrap();
        std::io::Write::write_all(&mut index, b"garbage\n").unwrap();

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, ["run-a", "run-b"]);
    }
}
