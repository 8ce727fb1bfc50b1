//! Scheduler - Decides which enabled rollups are due for an execution
//!
//! Each rollup carries an interval schedule. The scheduler remembers when it
//! last fired a rollup (in memory, per process) and reports it due once the
//! next fire time has passed. The engine itself re-checks `enabled`, so a
//! rollup stopped between the check and the execution is harmless.

use crate::domain::{Rollup, RollupId};
use crate::port::TimeProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Scheduler determines which rollups should run on this tick
pub struct Scheduler {
    time_provider: Arc<dyn TimeProvider>,
    last_runs: Mutex<HashMap<RollupId, i64>>,
}

impl Scheduler {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            last_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a rollup is due given its last fire time
    pub fn is_due(&self, rollup: &Rollup, last_run: Option<i64>) -> bool {
        let now = self.time_provider.now_millis();
        let next = rollup.schedule.next_fire_time(last_run);
        if now < next {
            debug!(
                rollup_id = %rollup.id,
                next_fire_time = next,
                now = now,
                "Rollup not due yet"
            );
            return false;
        }
        true
    }

    /// Ids of the enabled rollups due now, in input order
    pub fn due(&self, rollups: &[Rollup]) -> Vec<RollupId> {
        let mut last_runs = self
            .last_runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Forget rollups that are no longer enabled so a restart fires immediately
        last_runs.retain(|id, _| rollups.iter().any(|r| &r.id == id));

        rollups
            .iter()
            .filter(|r| r.enabled && self.is_due(r, last_runs.get(&r.id).copied()))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Remember that a rollup fired now
    pub fn record_run(&self, rollup_id: &str) {
        let now = self.time_provider.now_millis();
        self.last_runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(rollup_id.to_string(), now);
    }
}
