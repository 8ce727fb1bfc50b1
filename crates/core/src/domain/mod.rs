// Domain Layer - Pure business logic and entities

pub mod document;
pub mod error;
pub mod metadata;
pub mod rollup;

// Re-exports
pub use document::{RollupDocument, SourceRecord, Versioned};
pub use error::DomainError;
pub use metadata::{AfterKey, MetadataId, RollupMetadata, RollupStatus};
pub use rollup::{Dimension, MetricConfig, MetricKind, Rollup, RollupId, Schedule};
