// Source records and rollup output documents

use crate::domain::metadata::AfterKey;
use serde::{Deserialize, Serialize};

/// Raw record read from a source index, ordered by (timestamp, doc_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub doc_id: String,
    pub timestamp: i64, // epoch ms
    pub body: serde_json::Value,
}

impl SourceRecord {
    pub fn new(doc_id: impl Into<String>, timestamp: i64, body: serde_json::Value) -> Self {
        Self {
            doc_id: doc_id.into(),
            timestamp,
            body,
        }
    }

    pub fn key(&self) -> AfterKey {
        AfterKey::new(self.timestamp, self.doc_id.clone())
    }
}

/// Aggregated bucket written to a target index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupDocument {
    pub doc_id: String,
    pub rollup_id: String,
    pub body: serde_json::Value,
}

/// A stored value together with the version its next write must be conditioned on
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i64) -> Self {
        Self { value, version }
    }
}
