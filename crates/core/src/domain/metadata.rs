// Rollup Run Metadata & Status State Machine

use crate::domain::error::{DomainError, Result};
use crate::domain::rollup::RollupId;
use serde::{Deserialize, Serialize};

/// Metadata ID
pub type MetadataId = String;

/// Run status of a rollup job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollupStatus {
    InitResumed,
    Started,
    Stopped,
    Finished,
    Failed,
}

impl std::fmt::Display for RollupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollupStatus::InitResumed => write!(f, "INIT_RESUMED"),
            RollupStatus::Started => write!(f, "STARTED"),
            RollupStatus::Stopped => write!(f, "STOPPED"),
            RollupStatus::Finished => write!(f, "FINISHED"),
            RollupStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for RollupStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INIT_RESUMED" => Ok(RollupStatus::InitResumed),
            "STARTED" => Ok(RollupStatus::Started),
            "STOPPED" => Ok(RollupStatus::Stopped),
            "FINISHED" => Ok(RollupStatus::Finished),
            "FAILED" => Ok(RollupStatus::Failed),
            other => Err(DomainError::InvalidRollup(format!(
                "unknown rollup status '{}'",
                other
            ))),
        }
    }
}

impl RollupStatus {
    /// Legal transitions of the status state machine.
    ///
    /// `continuous` gates re-entry from FINISHED; a finished one-shot job is terminal.
    pub fn can_transition_to(self, next: RollupStatus, continuous: bool) -> bool {
        use RollupStatus::*;
        match (self, next) {
            (_, Failed) => self != Failed,
            (InitResumed, Started) | (InitResumed, Stopped) => true,
            (Started, Started) | (Started, Finished) | (Started, Stopped) => true,
            (Stopped, Started) => true,
            (Finished, Started) | (Finished, InitResumed) => continuous,
            (Failed, InitResumed) => true,
            _ => false,
        }
    }

    /// Whether a stop request moves this status to STOPPED
    pub fn is_stoppable(self) -> bool {
        matches!(self, RollupStatus::Started | RollupStatus::InitResumed)
    }
}

/// Checkpoint of the last processed source record (exclusive lower bound of the next window)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AfterKey {
    pub timestamp: i64,
    pub doc_id: String,
}

impl AfterKey {
    pub fn new(timestamp: i64, doc_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            doc_id: doc_id.into(),
        }
    }
}

/// Run Metadata Record (one per rollup, created on first execution)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupMetadata {
    pub id: MetadataId,
    pub rollup_id: RollupId,
    pub status: RollupStatus,
    pub after_key: Option<AfterKey>,
    pub last_updated_time: i64, // epoch ms
    pub documents_processed: i64,
    pub rollups_indexed: i64,
    pub failure_reason: Option<String>,
}

impl RollupMetadata {
    /// New record for a first execution, already STARTED
    pub fn new_started(
        id: impl Into<String>,
        rollup_id: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            rollup_id: rollup_id.into(),
            status: RollupStatus::Started,
            after_key: None,
            last_updated_time: now_millis,
            documents_processed: 0,
            rollups_indexed: 0,
            failure_reason: None,
        }
    }

    fn transition(&mut self, next: RollupStatus, continuous: bool, now_millis: i64) -> Result<()> {
        if !self.status.can_transition_to(next, continuous) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.last_updated_time = now_millis;
        Ok(())
    }

    /// Move to STARTED. Returns false when already STARTED (nothing to persist).
    pub fn start(&mut self, continuous: bool, now_millis: i64) -> Result<bool> {
        if self.status == RollupStatus::Started {
            return Ok(false);
        }
        self.transition(RollupStatus::Started, continuous, now_millis)?;
        Ok(true)
    }

    /// Move STARTED/INIT_RESUMED to STOPPED. Any other status is left untouched.
    pub fn stop(&mut self, now_millis: i64) -> bool {
        if !self.status.is_stoppable() {
            return false;
        }
        self.status = RollupStatus::Stopped;
        self.last_updated_time = now_millis;
        true
    }

    pub fn finish(&mut self, continuous: bool, now_millis: i64) -> Result<()> {
        self.transition(RollupStatus::Finished, continuous, now_millis)
    }

    /// Record a processed window: advance the checkpoint and counters
    pub fn advance(
        &mut self,
        after_key: AfterKey,
        documents: i64,
        rollups: i64,
        now_millis: i64,
    ) -> Result<()> {
        if self.status != RollupStatus::Started {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: RollupStatus::Started.to_string(),
            });
        }
        if let Some(current) = &self.after_key {
            if after_key <= *current {
                return Err(DomainError::InvalidRollup(format!(
                    "checkpoint must move forward: {:?} -> {:?}",
                    current, after_key
                )));
            }
        }
        self.after_key = Some(after_key);
        self.documents_processed += documents;
        self.rollups_indexed += rollups;
        self.last_updated_time = now_millis;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now_millis: i64) -> Result<()> {
        self.transition(RollupStatus::Failed, true, now_millis)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Operator restart of a FAILED (or finished continuous) record. Keeps the checkpoint.
    pub fn resume(&mut self, continuous: bool, now_millis: i64) -> Result<bool> {
        match self.status {
            RollupStatus::Failed | RollupStatus::Finished => {
                self.transition(RollupStatus::InitResumed, continuous, now_millis)?;
                self.failure_reason = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> RollupMetadata {
        RollupMetadata::new_started("m1", "r1", 1_000)
    }

    #[test]
    fn test_stop_from_started_and_init_resumed() {
        let mut meta = started();
        assert!(meta.stop(2_000));
        assert_eq!(meta.status, RollupStatus::Stopped);
        assert_eq!(meta.last_updated_time, 2_000);

        // Repeated stop changes nothing
        assert!(!meta.stop(3_000));
        assert_eq!(meta.last_updated_time, 2_000);

        meta.status = RollupStatus::InitResumed;
        assert!(meta.stop(4_000));
        assert_eq!(meta.status, RollupStatus::Stopped);
    }

    #[test]
    fn test_stop_leaves_finished_and_failed_untouched() {
        let mut meta = started();
        meta.finish(false, 2_000).unwrap();
        assert!(!meta.stop(3_000));
        assert_eq!(meta.status, RollupStatus::Finished);

        let mut meta = started();
        meta.fail("bad data", 2_000).unwrap();
        assert!(!meta.stop(3_000));
        assert_eq!(meta.status, RollupStatus::Failed);
    }

    #[test]
    fn test_finished_one_shot_is_terminal() {
        let mut meta = started();
        meta.finish(false, 2_000).unwrap();
        assert!(meta.start(false, 3_000).is_err());
        assert!(meta.resume(false, 3_000).is_err());
    }

    #[test]
    fn test_finished_continuous_reenters() {
        let mut meta = started();
        meta.finish(true, 2_000).unwrap();
        assert!(meta.start(true, 3_000).unwrap());
        assert_eq!(meta.status, RollupStatus::Started);
    }

    #[test]
    fn test_failed_requires_resume() {
        let mut meta = started();
        meta.fail("write rejected", 2_000).unwrap();
        assert_eq!(meta.failure_reason.as_deref(), Some("write rejected"));
        assert!(meta.start(true, 3_000).is_err());

        assert!(meta.resume(true, 3_000).unwrap());
        assert_eq!(meta.status, RollupStatus::InitResumed);
        assert_eq!(meta.failure_reason, None);
        assert!(meta.start(true, 4_000).unwrap());
    }

    #[test]
    fn test_advance_moves_checkpoint_forward_only() {
        let mut meta = started();
        meta.advance(AfterKey::new(10, "b"), 5, 2, 2_000).unwrap();
        assert_eq!(meta.documents_processed, 5);
        assert_eq!(meta.rollups_indexed, 2);

        assert!(meta.advance(AfterKey::new(10, "a"), 1, 1, 3_000).is_err());
        assert_eq!(meta.after_key, Some(AfterKey::new(10, "b")));
        assert_eq!(meta.documents_processed, 5);
    }

    #[test]
    fn test_advance_requires_started() {
        let mut meta = started();
        meta.stop(2_000);
        assert!(meta.advance(AfterKey::new(1, "a"), 1, 1, 3_000).is_err());
        assert_eq!(meta.after_key, None);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RollupStatus::InitResumed,
            RollupStatus::Started,
            RollupStatus::Stopped,
            RollupStatus::Finished,
            RollupStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<RollupStatus>().unwrap(), status);
        }
    }
}
