// Document Store Ports (source reads, target writes)

use crate::domain::{AfterKey, RollupDocument, SourceRecord};
use crate::error::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Target write errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Store temporarily unable to accept the write; the window can be replayed
    #[error("Target unavailable: {0}")]
    Unavailable(String),

    /// Store refused the documents; replaying the same window fails again
    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Unavailable(_))
    }
}

/// Paginated reads from a source index
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Read up to `limit` records ordered by (timestamp, doc_id)
    ///
    /// # Arguments
    /// * `after` - Exclusive lower bound (None = from the beginning)
    /// * `upper_bound` - Inclusive timestamp upper bound (None = unbounded)
    async fn read_window(
        &self,
        index: &str,
        after: Option<&AfterKey>,
        upper_bound: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>>;
}

/// Writes of aggregated documents to a target index
///
/// Writes are upserts keyed by `doc_id`, so replaying a window is idempotent.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    async fn write(&self, index: &str, docs: &[RollupDocument]) -> std::result::Result<(), WriteError>;

    /// Make previous writes visible to readers
    async fn refresh(&self, index: &str) -> std::result::Result<(), WriteError>;
}
