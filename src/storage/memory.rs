//! In-memory store for tests and embedded use.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{JobStore, StoreError};
use crate::core::job::Job;

/// Thread-safe in-memory job store. Nothing survives a restart.
pub struct InMemoryStore {
    jobs: RwLock<Vec<Job>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
        }
    }

    /// Create a store pre-seeded with jobs, as if loaded from disk.
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: RwLock::new(jobs),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn load(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.read().await.clone())
    }

    async fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        *self.jobs.write().await = jobs.to_vec();
        Ok(())
    }
}
