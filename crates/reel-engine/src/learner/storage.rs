use super::hints::LearningHints;
use crate::workflow::RunRecord;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Learning store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Learning store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Run {0} has already been persisted")]
    AlreadyPersisted(String),
}

/// Where run records go and where hints come from.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn load_hints(&self) -> Result<Option<LearningHints>, StoreError>;

    /// Write the record once and fold it into the hints. Returns the record's
    /// location when the store has one.
    async fn persist(&self, record: &RunRecord) -> Result<Option<PathBuf>, StoreError>;
}

/// JSON files under a root directory:
///
/// ```text
/// <root>/runs/<started>-<run_id>.json   one per run, never rewritten
/// <root>/hints.json                     merged after every run
/// ```
#[derive(Debug, Clone)]
pub struct FileLearningStore {
    root: PathBuf,
}

impl FileLearningStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.reel/learned`, or `./.reel/learned` without a home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reel")
            .join("learned")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hints_path(&self) -> PathBuf {
        self.root.join("hints.json")
    }

    fn run_path(&self, record: &RunRecord) -> PathBuf {
        let stamp = record.started_at.format("%Y%m%dT%H%M%SZ");
        self.root
            .join("runs")
            .join(format!("{}-{}.json", stamp, record.run_id))
    }
}

#[async_trait]
impl LearningStore for FileLearningStore {
    async fn load_hints(&self) -> Result<Option<LearningHints>, StoreError> {
        match tokio::fs::read_to_string(self.hints_path()).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, record: &RunRecord) -> Result<Option<PathBuf>, StoreError> {
        let path = self.run_path(record);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(record)?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyPersisted(record.run_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&body).await?;
        file.flush().await?;
        debug!("Run record written to {}", path.display());

        let mut hints = self.load_hints().await?.unwrap_or_default();
        hints.merge(record);
        let tmp = self.root.join("hints.json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&hints)?).await?;
        tokio::fs::rename(&tmp, self.hints_path()).await?;

        Ok(Some(path))
    }
}

/// In-process store for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryLearningStore {
    records: Arc<Mutex<Vec<RunRecord>>>,
    hints: Arc<Mutex<Option<LearningHints>>>,
}

impl MemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LearningStore for MemoryLearningStore {
    async fn load_hints(&self) -> Result<Option<LearningHints>, StoreError> {
        Ok(self.hints.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn persist(&self, record: &RunRecord) -> Result<Option<PathBuf>, StoreError> {
        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            if records.iter().any(|r| r.run_id == record.run_id) {
                return Err(StoreError::AlreadyPersisted(record.run_id.clone()));
            }
            records.push(record.clone());
        }
        let mut hints = self.hints.lock().unwrap_or_else(|e| e.into_inner());
        hints.get_or_insert_with(LearningHints::default).merge(record);
        Ok(None)
    }
}
