//! Atomic JSON file store.
//!
//! Save protocol: write the snapshot to a uniquely named sibling temp
//! file, copy the current file to `<file>.bak`, then rename the temp file
//! over the live path. The backup is for operator recovery only; the
//! store never reads it.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{JobStore, StoreDocument, StoreError, STORE_VERSION};
use crate::core::job::Job;

/// JSON file store for the job set.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default store location: `<home>/.mozi/cron/jobs.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mozi")
            .join("cron")
            .join("jobs.json")
    }

    /// The live file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jobs.json".to_string())
    }

    fn backup_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}.bak", self.file_name()))
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_file_name(format!(
            "{}.tmp-{}",
            self.file_name(),
            Uuid::new_v4().simple()
        ))
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn load(&self) -> Result<Vec<Job>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No store file yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let document: StoreDocument =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if document.version != STORE_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported store version: {}",
                document.version
            )));
        }
        Ok(document.jobs)
    }

    async fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let document = StoreDocument {
            version: STORE_VERSION,
            jobs: jobs.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.temp_path();
        let result = async {
            tokio::fs::write(&temp, content.as_bytes()).await?;
            if tokio::fs::try_exists(&self.path).await? {
                tokio::fs::copy(&self.path, self.backup_path()).await?;
            }
            tokio::fs::rename(&temp, &self.path).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }
}
