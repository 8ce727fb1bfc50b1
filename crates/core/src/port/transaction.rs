// Transaction port for atomic operations

use crate::domain::{Rollup, RollupMetadata, Versioned};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Store capable of opening rollup transactions
#[async_trait]
pub trait TransactionalRollupStore: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn RollupStoreTransaction>>;
}

/// Rollup store operations within a transaction
///
/// Used to create a metadata record and link it to its rollup in one step.
#[async_trait]
pub trait RollupStoreTransaction: Transaction {
    /// Find rollup (within transaction)
    async fn find_rollup(&mut self, id: &str) -> Result<Option<Versioned<Rollup>>>;

    /// Insert metadata (within transaction). Returns the initial version.
    async fn insert_metadata(&mut self, metadata: &RollupMetadata) -> Result<i64>;

    /// Conditioned rollup update (within transaction)
    async fn update_rollup(&mut self, rollup: &Rollup, expected_version: i64) -> Result<i64>;
}
