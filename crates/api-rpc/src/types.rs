//! RPC Request/Response Types
//!
//! `rollup.put.v1` takes a `PutRollupRequest` and returns the stored `Rollup`;
//! `metadata.get.v1` returns a `RollupMetadata`. Both live in the core crate.

use serde::{Deserialize, Serialize};

pub use rollup_core::application::PutRollupRequest;

/// rollup.get.v1 / rollup.start.v1 / rollup.stop.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupIdRequest {
    pub rollup_id: String,
}

/// metadata.get.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataIdRequest {
    pub metadata_id: String,
}

/// Result of start and stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgedResponse {
    pub acknowledged: bool,
}

impl AcknowledgedResponse {
    pub fn ok() -> Self {
        Self { acknowledged: true }
    }
}
