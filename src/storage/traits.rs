use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;
use crate::touch::{Consistency, ScanStep};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Scan script {sha} is not loaded in the queue store")]
    ScriptNotLoaded { sha: String },
    #[error("Tier '{tier}' timed out after {after:?}")]
    Timeout { tier: String, after: Duration },
    #[error("Invalid touch uid: {0}")]
    InvalidTouchUid(String),
    #[error("Unexpected scan reply: {0}")]
    Protocol(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether the caller may retry once the queue store has the scan script again.
    pub fn is_script_missing(&self) -> bool {
        matches!(self, StorageError::ScriptNotLoaded { .. })
    }
}

/// A store holding the pipeline's queue lists.
///
/// Implementations must execute [`QueueStore::scan`] atomically with respect
/// to concurrent producers mutating the same list.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// One Scanner Protocol invocation: walk `list` from `start_index` toward
    /// the head for at most `max_count` entries looking for `target_uid`.
    async fn scan(
        &self,
        list: &str,
        target_uid: &str,
        start_index: i64,
        max_count: usize,
    ) -> Result<ScanStep, StorageError>;

    /// Make sure whatever the scan needs server-side is installed.
    /// Default is a no-op for stores that scan in-process.
    async fn install_scanner(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Read-only view of the durable touch log.
#[async_trait]
pub trait OwnerStore: Send + Sync {
    /// Sub of the user owning the earliest row for `touch_uid`, read at `consistency`.
    async fn resolve_owner(
        &self,
        touch_uid: &str,
        consistency: Consistency,
    ) -> Result<Option<String>, StorageError>;
}
