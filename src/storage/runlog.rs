//! Append-only run history, one JSONL file per job.
//!
//! Records carry run metadata only; agent output text is never written
//! here. Unreadable lines are dropped on read rather than failing the
//! whole history.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::StoreError;
use crate::core::types::{JobId, RunId, RunStatus};

/// One realised execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: RunId,
    pub job_id: JobId,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-job run history under a directory of JSONL files.
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    /// Create a run log rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The history directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.jsonl"))
    }

    /// Append one record to the job's history.
    pub async fn append(&self, record: &RunRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&record.job_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// The most recent `limit` records for a job, newest first.
    pub async fn recent(&self, job_id: &JobId, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let content = match tokio::fs::read_to_string(self.path_for(job_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect::<Vec<RunRecord>>()
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }
}
