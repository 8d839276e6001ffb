//! Durable persistence for the job set.
//!
//! The live artifact is a versioned JSON snapshot; every save rewrites the
//! whole document through an atomic rename so readers never observe a
//! partial write. Backends are pluggable behind [`JobStore`].

mod file;
mod memory;
mod runlog;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use runlog::{RunLog, RunRecord};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::job::Job;

/// Current store document version.
pub const STORE_VERSION: u32 = 1;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file exists but cannot be understood.
    #[error("store file is corrupt: {0}")]
    Corrupt(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The persisted document: a complete, self-consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    pub version: u32,
    pub jobs: Vec<Job>,
}

/// Storage contract for the job set.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load the full job set. A missing backing file is an empty set.
    async fn load(&self) -> Result<Vec<Job>, StoreError>;

    /// Persist the full job set as one snapshot.
    async fn save(&self, jobs: &[Job]) -> Result<(), StoreError>;
}
