// ============================================================================
// In-Memory Store for Testing
// ============================================================================
//
// Implements every storage port with the same version-conditioned semantics
// as the SQLite adapter, plus fault injection for write failures and
// concurrent-writer conflicts.

use crate::domain::{
    AfterKey, Rollup, RollupDocument, RollupMetadata, RollupStatus, SourceRecord, Versioned,
};
use crate::error::{AppError, Result};
use crate::port::{
    MetadataRepository, RollupRepository, RollupStoreTransaction, SourceReader, TargetWriter,
    Transaction, TransactionalRollupStore, WriteError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
struct StoreState {
    rollups: HashMap<String, Versioned<Rollup>>,
    metadata: HashMap<String, Versioned<RollupMetadata>>,
    sources: HashMap<String, Vec<SourceRecord>>,
    targets: HashMap<String, BTreeMap<String, RollupDocument>>,
}

#[derive(Debug, Default)]
struct Faults {
    write_failures: VecDeque<WriteError>,
    rollup_conflicts: u32,
    metadata_conflicts: u32,
}

/// In-memory implementation of all storage ports
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    faults: std::sync::Mutex<Faults>,
    write_calls: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            faults: std::sync::Mutex::new(Faults::default()),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Add records to a source index
    pub async fn index_source(&self, index: &str, records: Vec<SourceRecord>) {
        let mut state = self.state.lock().await;
        let source = state.sources.entry(index.to_string()).or_default();
        source.extend(records);
        source.sort_by(|a, b| a.key().cmp(&b.key()));
    }

    /// Documents currently stored in a target index, ordered by doc_id
    pub async fn target_documents(&self, index: &str) -> Vec<RollupDocument> {
        let state = self.state.lock().await;
        state
            .targets
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Fail the next `times` target writes with `error`
    pub fn fail_next_writes(&self, error: WriteError, times: usize) {
        let mut faults = self.faults.lock().unwrap();
        for _ in 0..times {
            faults.write_failures.push_back(error.clone());
        }
    }

    /// Simulate a concurrent writer winning the next `times` rollup updates
    pub fn conflict_next_rollup_updates(&self, times: u32) {
        self.faults.lock().unwrap().rollup_conflicts = times;
    }

    /// Simulate a concurrent writer winning the next `times` metadata updates
    pub fn conflict_next_metadata_updates(&self, times: u32) {
        self.faults.lock().unwrap().metadata_conflicts = times;
    }

    /// Number of target write attempts (successful or not)
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn take_rollup_conflict(&self) -> bool {
        let mut faults = self.faults.lock().unwrap();
        if faults.rollup_conflicts > 0 {
            faults.rollup_conflicts -= 1;
            return true;
        }
        false
    }

    fn take_metadata_conflict(&self) -> bool {
        let mut faults = self.faults.lock().unwrap();
        if faults.metadata_conflicts > 0 {
            faults.metadata_conflicts -= 1;
            return true;
        }
        false
    }
}

fn update_rollup_in(state: &mut StoreState, rollup: &Rollup, expected_version: i64) -> Result<i64> {
    let stored = state
        .rollups
        .get_mut(&rollup.id)
        .ok_or_else(|| AppError::NotFound(format!("Rollup {} not found", rollup.id)))?;

    if stored.version != expected_version {
        return Err(AppError::Conflict(format!(
            "Rollup {} version {} != expected {}",
            rollup.id, stored.version, expected_version
        )));
    }
    stored.value = rollup.clone();
    stored.version += 1;
    Ok(stored.version)
}

fn insert_metadata_in(state: &mut StoreState, metadata: &RollupMetadata) -> Result<i64> {
    if state.metadata.contains_key(&metadata.id) {
        return Err(AppError::Conflict(format!(
            "Metadata {} already exists",
            metadata.id
        )));
    }
    state
        .metadata
        .insert(metadata.id.clone(), Versioned::new(metadata.clone(), 1));
    Ok(1)
}

#[async_trait]
impl RollupRepository for InMemoryStore {
    async fn insert_rollup(&self, rollup: &Rollup) -> Result<i64> {
        let mut state = self.state.lock().await;
        if state.rollups.contains_key(&rollup.id) {
            return Err(AppError::Conflict(format!(
                "Rollup {} already exists",
                rollup.id
            )));
        }
        state
            .rollups
            .insert(rollup.id.clone(), Versioned::new(rollup.clone(), 1));
        Ok(1)
    }

    async fn find_rollup(&self, id: &str) -> Result<Option<Versioned<Rollup>>> {
        Ok(self.state.lock().await.rollups.get(id).cloned())
    }

    async fn update_rollup(&self, rollup: &Rollup, expected_version: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        if self.take_rollup_conflict() {
            if let Some(stored) = state.rollups.get_mut(&rollup.id) {
                stored.version += 1;
            }
            return Err(AppError::Conflict(format!(
                "Rollup {} modified concurrently",
                rollup.id
            )));
        }
        update_rollup_in(&mut state, rollup, expected_version)
    }

    async fn list_enabled(&self) -> Result<Vec<Rollup>> {
        let state = self.state.lock().await;
        let mut enabled: Vec<Rollup> = state
            .rollups
            .values()
            .filter(|v| v.value.enabled)
            .map(|v| v.value.clone())
            .collect();
        enabled.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(enabled)
    }
}

#[async_trait]
impl MetadataRepository for InMemoryStore {
    async fn find_metadata(&self, id: &str) -> Result<Option<Versioned<RollupMetadata>>> {
        Ok(self.state.lock().await.metadata.get(id).cloned())
    }

    async fn update_metadata(
        &self,
        metadata: &RollupMetadata,
        expected_version: i64,
    ) -> Result<i64> {
        let mut state = self.state.lock().await;
        let stored = state
            .metadata
            .get_mut(&metadata.id)
            .ok_or_else(|| AppError::NotFound(format!("Metadata {} not found", metadata.id)))?;

        if self.take_metadata_conflict() {
            stored.version += 1;
            return Err(AppError::Conflict(format!(
                "Metadata {} modified concurrently",
                metadata.id
            )));
        }
        if stored.version != expected_version {
            return Err(AppError::Conflict(format!(
                "Metadata {} version {} != expected {}",
                metadata.id, stored.version, expected_version
            )));
        }
        stored.value = metadata.clone();
        stored.version += 1;
        Ok(stored.version)
    }

    async fn find_metadata_by_status(&self, status: RollupStatus) -> Result<Vec<RollupMetadata>> {
        let state = self.state.lock().await;
        Ok(state
            .metadata
            .values()
            .filter(|v| v.value.status == status)
            .map(|v| v.value.clone())
            .collect())
    }
}

/// Transaction holding the store lock; changes are staged and applied on commit
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        *self.guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RollupStoreTransaction for InMemoryTransaction {
    async fn find_rollup(&mut self, id: &str) -> Result<Option<Versioned<Rollup>>> {
        Ok(self.staged.rollups.get(id).cloned())
    }

    async fn insert_metadata(&mut self, metadata: &RollupMetadata) -> Result<i64> {
        insert_metadata_in(&mut self.staged, metadata)
    }

    async fn update_rollup(&mut self, rollup: &Rollup, expected_version: i64) -> Result<i64> {
        update_rollup_in(&mut self.staged, rollup, expected_version)
    }
}

#[async_trait]
impl TransactionalRollupStore for InMemoryStore {
    async fn begin_transaction(&self) -> Result<Box<dyn RollupStoreTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, staged }))
    }
}

#[async_trait]
impl SourceReader for InMemoryStore {
    async fn read_window(
        &self,
        index: &str,
        after: Option<&AfterKey>,
        upper_bound: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>> {
        let state = self.state.lock().await;
        let Some(records) = state.sources.get(index) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|r| after.map_or(true, |a| r.key() > *a))
            .filter(|r| upper_bound.map_or(true, |upper| r.timestamp <= upper))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TargetWriter for InMemoryStore {
    async fn write(
        &self,
        index: &str,
        docs: &[RollupDocument],
    ) -> std::result::Result<(), WriteError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.faults.lock().unwrap().write_failures.pop_front() {
            return Err(error);
        }

        let mut state = self.state.lock().await;
        let target = state.targets.entry(index.to_string()).or_default();
        for doc in docs {
            target.insert(doc.doc_id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn refresh(&self, _index: &str) -> std::result::Result<(), WriteError> {
        Ok(())
    }
}
