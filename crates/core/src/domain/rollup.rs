// Rollup Job Definition

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Rollup ID
pub type RollupId = String;

/// Largest page a single execution window may read
pub const MAX_PAGE_SIZE: i64 = 10_000;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Interval schedule consumed by the scheduler driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Schedule {
    Interval { start_time: i64, period_ms: i64 },
}

impl Schedule {
    pub fn interval(start_time: i64, period_ms: i64) -> Self {
        Schedule::Interval {
            start_time,
            period_ms,
        }
    }

    /// Next fire time strictly after `last_run`, or the start time when never run
    pub fn next_fire_time(&self, last_run: Option<i64>) -> i64 {
        match *self {
            Schedule::Interval {
                start_time,
                period_ms,
            } => match last_run {
                None => start_time,
                Some(last) if last < start_time => start_time,
                Some(last) => {
                    let period_ms = period_ms.max(1);
                    let elapsed_periods = last.saturating_sub(start_time) / period_ms + 1;
                    start_time.saturating_add(elapsed_periods.saturating_mul(period_ms))
                }
            },
        }
    }
}

/// Grouping dimension (closed set, consumed only by the aggregation step)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Dimension {
    DateHistogram {
        source_field: String,
        target_field: String,
        fixed_interval_ms: i64,
    },
    Terms {
        source_field: String,
        target_field: String,
    },
    Histogram {
        source_field: String,
        target_field: String,
        interval: f64,
    },
}

impl Dimension {
    pub fn date_histogram(source_field: impl Into<String>, fixed_interval_ms: i64) -> Self {
        let source_field = source_field.into();
        Dimension::DateHistogram {
            target_field: source_field.clone(),
            source_field,
            fixed_interval_ms,
        }
    }

    pub fn terms(source_field: impl Into<String>) -> Self {
        let source_field = source_field.into();
        Dimension::Terms {
            target_field: source_field.clone(),
            source_field,
        }
    }

    pub fn source_field(&self) -> &str {
        match self {
            Dimension::DateHistogram { source_field, .. }
            | Dimension::Terms { source_field, .. }
            | Dimension::Histogram { source_field, .. } => source_field,
        }
    }

    pub fn target_field(&self) -> &str {
        match self {
            Dimension::DateHistogram { target_field, .. }
            | Dimension::Terms { target_field, .. }
            | Dimension::Histogram { target_field, .. } => target_field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Min,
    Max,
    Sum,
    Avg,
    ValueCount,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Min => write!(f, "min"),
            MetricKind::Max => write!(f, "max"),
            MetricKind::Sum => write!(f, "sum"),
            MetricKind::Avg => write!(f, "avg"),
            MetricKind::ValueCount => write!(f, "value_count"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub source_field: String,
    pub target_field: String,
    pub kinds: Vec<MetricKind>,
}

/// Rollup Job Definition
///
/// Aggregation parameters are fixed at creation. Only the control fields
/// (`enabled`, `enabled_time`, `last_updated_time`, `metadata_id`) change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub id: RollupId,
    pub schema_version: i64,

    // Control fields
    pub enabled: bool,
    pub enabled_time: Option<i64>, // epoch ms
    pub last_updated_time: i64,    // epoch ms
    pub metadata_id: Option<String>,

    pub schedule: Schedule,
    pub continuous: bool,
    pub description: String,

    // Aggregation parameters
    pub source_index: String,
    pub target_index: String,
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<MetricConfig>,
    pub page_size: i64,
    pub delay_ms: i64,
}

impl Rollup {
    /// Enable the job. Returns false when it was already enabled (enabled_time kept).
    pub fn enable(&mut self, now_millis: i64) -> bool {
        if self.enabled {
            return false;
        }
        self.enabled = true;
        self.enabled_time = Some(now_millis);
        self.last_updated_time = now_millis;
        true
    }

    /// Disable the job. Returns false when it was already disabled.
    pub fn disable(&mut self, now_millis: i64) -> bool {
        if !self.enabled && self.enabled_time.is_none() {
            return false;
        }
        self.enabled = false;
        self.enabled_time = None;
        self.last_updated_time = now_millis;
        true
    }

    /// Upper bound (inclusive) of source timestamps a window may read
    pub fn window_upper_bound(&self, now_millis: i64) -> Option<i64> {
        if self.continuous {
            Some(now_millis.saturating_sub(self.delay_ms))
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DomainError::InvalidRollup(msg));

        if self.id.trim().is_empty() {
            return invalid("id must not be empty".to_string());
        }
        if self.source_index.trim().is_empty() || self.target_index.trim().is_empty() {
            return invalid("source_index and target_index must not be empty".to_string());
        }
        if self.source_index == self.target_index {
            return invalid(format!(
                "source_index and target_index must differ (both '{}')",
                self.source_index
            ));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return invalid(format!(
                "page_size {} out of range 1..={}",
                self.page_size, MAX_PAGE_SIZE
            ));
        }
        if self.delay_ms < 0 {
            return invalid(format!("delay_ms must not be negative: {}", self.delay_ms));
        }
        let Schedule::Interval { period_ms, .. } = self.schedule;
        if period_ms <= 0 {
            return invalid(format!("schedule period must be positive: {}", period_ms));
        }
        if self.enabled != self.enabled_time.is_some() {
            return invalid("enabled_time must be set exactly when enabled".to_string());
        }

        match self.dimensions.first() {
            None => return invalid("at least one dimension is required".to_string()),
            Some(Dimension::DateHistogram { .. }) => {}
            Some(_) => {
                return invalid("the first dimension must be a date_histogram".to_string())
            }
        }

        let mut targets = HashSet::new();
        for dimension in &self.dimensions {
            match dimension {
                Dimension::DateHistogram {
                    fixed_interval_ms, ..
                } if *fixed_interval_ms <= 0 => {
                    return invalid(format!(
                        "date_histogram interval on '{}' must be positive",
                        dimension.source_field()
                    ));
                }
                Dimension::Histogram { interval, .. } if !(*interval > 0.0) => {
                    return invalid(format!(
                        "histogram interval on '{}' must be positive",
                        dimension.source_field()
                    ));
                }
                _ => {}
            }
            if !targets.insert(dimension.target_field()) {
                return invalid(format!(
                    "duplicate dimension target field '{}'",
                    dimension.target_field()
                ));
            }
        }

        let mut metric_sources = HashSet::new();
        for metric in &self.metrics {
            if metric.kinds.is_empty() {
                return invalid(format!(
                    "metric on '{}' must name at least one kind",
                    metric.source_field
                ));
            }
            if !metric_sources.insert(metric.source_field.as_str()) {
                return invalid(format!(
                    "duplicate metric source field '{}'",
                    metric.source_field
                ));
            }
        }

        Ok(())
    }
}

impl Rollup {
    /// Create a disabled rollup over `source_index` with a single date histogram
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        source_index: impl Into<String>,
        target_index: impl Into<String>,
        dimensions: Vec<Dimension>,
    ) -> Self {
        Self {
            id: id.into(),
            schema_version: CURRENT_SCHEMA_VERSION,
            enabled: false,
            enabled_time: None,
            last_updated_time: created_at,
            metadata_id: None,
            schedule: Schedule::interval(created_at, 60_000),
            continuous: false,
            description: String::new(),
            source_index: source_index.into(),
            target_index: target_index.into(),
            dimensions,
            metrics: Vec::new(),
            page_size: 1000,
            delay_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Rollup {
        Rollup::new(
            "r1",
            1_000,
            "source",
            "target",
            vec![
                Dimension::date_histogram("timestamp", 3_600_000),
                Dimension::terms("RatecodeID"),
            ],
        )
    }

    #[test]
    fn test_enable_sets_enabled_time_once() {
        let mut rollup = sample();
        assert!(rollup.enable(5_000));
        assert_eq!(rollup.enabled_time, Some(5_000));

        assert!(!rollup.enable(9_000));
        assert_eq!(rollup.enabled_time, Some(5_000));
        assert_eq!(rollup.last_updated_time, 5_000);
    }

    #[test]
    fn test_disable_is_noop_when_disabled() {
        let mut rollup = sample();
        rollup.enable(5_000);

        assert!(rollup.disable(6_000));
        assert!(!rollup.enabled);
        assert_eq!(rollup.enabled_time, None);

        assert!(!rollup.disable(7_000));
        assert_eq!(rollup.last_updated_time, 6_000);
    }

    #[test]
    fn test_validate_rejects_terms_first() {
        let mut rollup = sample();
        rollup.dimensions.reverse();
        let err = rollup.validate().unwrap_err();
        assert!(err.to_string().contains("date_histogram"));
    }

    #[test]
    fn test_validate_rejects_page_size_out_of_range() {
        let mut rollup = sample();
        rollup.page_size = 0;
        assert!(rollup.validate().is_err());
        rollup.page_size = MAX_PAGE_SIZE + 1;
        assert!(rollup.validate().is_err());
        rollup.page_size = 10;
        assert!(rollup.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_same_source_and_target() {
        let mut rollup = sample();
        rollup.target_index = "source".to_string();
        assert!(rollup.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_metric_fields() {
        let mut rollup = sample();
        rollup.metrics = vec![
            MetricConfig {
                source_field: "fare".to_string(),
                target_field: "fare".to_string(),
                kinds: vec![MetricKind::Sum],
            },
            MetricConfig {
                source_field: "fare".to_string(),
                target_field: "fare2".to_string(),
                kinds: vec![MetricKind::Max],
            },
        ];
        assert!(rollup.validate().is_err());
    }

    #[test]
    fn test_schedule_next_fire_time() {
        let schedule = Schedule::interval(1_000, 500);
        assert_eq!(schedule.next_fire_time(None), 1_000);
        assert_eq!(schedule.next_fire_time(Some(1_000)), 1_500);
        assert_eq!(schedule.next_fire_time(Some(1_499)), 1_500);
        assert_eq!(schedule.next_fire_time(Some(200)), 1_000);
    }

    #[test]
    fn test_window_upper_bound_only_for_continuous() {
        let mut rollup = sample();
        assert_eq!(rollup.window_upper_bound(10_000), None);
        rollup.continuous = true;
        rollup.delay_ms = 2_000;
        assert_eq!(rollup.window_upper_bound(10_000), Some(8_000));
    }

    #[test]
    fn test_validate_checks_every_date_histogram_interval() {
        let mut rollup = sample();
        rollup.dimensions.push(Dimension::DateHistogram {
            source_field: "dropoff".to_string(),
            target_field: "dropoff".to_string(),
            fixed_interval_ms: 0,
        });
        let err = rollup.validate().unwrap_err();
        assert!(err.to_string().contains("dropoff"));

        rollup.dimensions[2] = Dimension::date_histogram("dropoff", 60_000);
        assert!(rollup.validate().is_ok());
    }

    #[test]
    fn test_next_fire_time_saturates_on_huge_period() {
        let schedule = Schedule::interval(0, i64::MAX / 2 + 1);
        assert_eq!(schedule.next_fire_time(Some(10)), i64::MAX / 2 + 1);
        assert_eq!(schedule.next_fire_time(Some(i64::MAX / 2 + 1)), i64::MAX);
    }
}
