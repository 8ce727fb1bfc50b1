// Rollup Infrastructure - SQLite Adapter
// Implements: RollupRepository, MetadataRepository, TransactionalRollupStore,
// SourceReader, TargetWriter

mod connection;
mod document_store;
mod error;
mod migration;
mod rollup_repository;
mod rows;
mod transaction;

pub use connection::create_pool;
pub use document_store::SqliteDocumentStore;
pub use migration::run_migrations;
pub use rollup_repository::SqliteRollupRepository;
pub use transaction::SqliteRollupTransaction;

// Note: sqlx::Error conversion is handled by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
