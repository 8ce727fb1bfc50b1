// Port Layer - Interfaces for external dependencies

pub mod document_store;
pub mod id_provider; // For deterministic testing
pub mod mocks;
pub mod rollup_repository;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use document_store::{SourceReader, TargetWriter, WriteError};
pub use id_provider::IdProvider;
pub use rollup_repository::{MetadataRepository, RollupRepository};
pub use time_provider::TimeProvider;
pub use transaction::{RollupStoreTransaction, Transaction, TransactionalRollupStore};
