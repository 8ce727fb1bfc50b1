//! Window aggregation
//!
//! Groups one window of source records into buckets keyed by the rollup's
//! dimension values and computes mergeable metrics (min, max, sum, count) per
//! bucket. Each bucket becomes one target document whose id is derived from the
//! rollup id, the window's lower bound and the bucket key, so writing the same
//! window twice overwrites rather than duplicates.
//!
//! Records missing a dimension field are skipped. A field holding a value of
//! the wrong type is malformed data and fails the whole window.

use crate::domain::{AfterKey, Dimension, MetricConfig, MetricKind, Rollup, RollupDocument, SourceRecord};
use crate::error::{AppError, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct MetricAcc {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: i64,
}

impl MetricAcc {
    fn observe(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.sum += value;
        self.count += 1;
    }

    fn render(&self, kinds: &[MetricKind]) -> Value {
        let mut out = Map::new();
        for kind in kinds {
            let value = match kind {
                MetricKind::Min => self.min.map_or(Value::Null, |v| json!(v)),
                MetricKind::Max => self.max.map_or(Value::Null, |v| json!(v)),
                MetricKind::Sum => json!(self.sum),
                MetricKind::ValueCount => json!(self.count),
                MetricKind::Avg => {
                    if self.count > 0 {
                        json!(self.sum / self.count as f64)
                    } else {
                        Value::Null
                    }
                }
            };
            out.insert(kind.to_string(), value);
        }
        Value::Object(out)
    }
}

#[derive(Debug)]
struct Bucket {
    key: Vec<Value>,
    doc_count: i64,
    metrics: Vec<MetricAcc>,
}

fn malformed(record: &SourceRecord, field: &str, expected: &str) -> AppError {
    AppError::Execution(format!(
        "malformed source document {}: field '{}' is not {}",
        record.doc_id, field, expected
    ))
}

/// Bucket value of one dimension; None when the record lacks the field
fn dimension_value(dimension: &Dimension, record: &SourceRecord) -> Result<Option<Value>> {
    let raw = match record.body.get(dimension.source_field()) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };

    match dimension {
        Dimension::DateHistogram {
            source_field,
            fixed_interval_ms,
            ..
        } => {
            let ts = raw
                .as_i64()
                .ok_or_else(|| malformed(record, source_field, "an epoch-millis integer"))?;
            let bucket = ts
                .checked_div_euclid(*fixed_interval_ms)
                .filter(|_| *fixed_interval_ms > 0)
                .and_then(|n| n.checked_mul(*fixed_interval_ms))
                .ok_or_else(|| {
                    AppError::Execution(format!(
                        "date_histogram on '{}' has invalid interval {}",
                        source_field, fixed_interval_ms
                    ))
                })?;
            Ok(Some(json!(bucket)))
        }
        Dimension::Histogram {
            source_field,
            interval,
            ..
        } => {
            let v = raw
                .as_f64()
                .ok_or_else(|| malformed(record, source_field, "numeric"))?;
            Ok(Some(json!((v / interval).floor() * interval)))
        }
        Dimension::Terms { source_field, .. } => match raw {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(Some(raw.clone())),
            _ => Err(malformed(record, source_field, "a scalar term")),
        },
    }
}

fn metric_value(metric: &MetricConfig, record: &SourceRecord) -> Result<Option<f64>> {
    match record.body.get(&metric.source_field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| malformed(record, &metric.source_field, "numeric")),
    }
}

fn window_label(window_start: Option<&AfterKey>) -> String {
    match window_start {
        Some(key) => format!("{}:{}", key.timestamp, key.doc_id),
        None => "start".to_string(),
    }
}

/// Aggregate one window of records into target documents
///
/// # Errors
/// `AppError::Execution` when a record carries a malformed dimension or metric value
pub fn aggregate_window(
    rollup: &Rollup,
    window_start: Option<&AfterKey>,
    records: &[SourceRecord],
) -> Result<Vec<RollupDocument>> {
    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

    'records: for record in records {
        let mut key = Vec::with_capacity(rollup.dimensions.len());
        for dimension in &rollup.dimensions {
            match dimension_value(dimension, record)? {
                Some(value) => key.push(value),
                None => continue 'records,
            }
        }

        let mut values = Vec::with_capacity(rollup.metrics.len());
        for metric in &rollup.metrics {
            values.push(metric_value(metric, record)?);
        }

        let bucket = buckets
            .entry(Value::Array(key.clone()).to_string())
            .or_insert_with(|| Bucket {
                key,
                doc_count: 0,
                metrics: vec![MetricAcc::default(); rollup.metrics.len()],
            });
        bucket.doc_count += 1;
        for (acc, value) in bucket.metrics.iter_mut().zip(values) {
            if let Some(v) = value {
                acc.observe(v);
            }
        }
    }

    let label = window_label(window_start);
    Ok(buckets
        .into_iter()
        .map(|(key_repr, bucket)| {
            let mut dimensions = Map::new();
            for (dimension, value) in rollup.dimensions.iter().zip(bucket.key) {
                dimensions.insert(dimension.target_field().to_string(), value);
            }

            let mut metrics = Map::new();
            for (metric, acc) in rollup.metrics.iter().zip(&bucket.metrics) {
                metrics.insert(metric.target_field.clone(), acc.render(&metric.kinds));
            }

            RollupDocument {
                doc_id: format!("{}#{}#{}", rollup.id, label, key_repr),
                rollup_id: rollup.id.clone(),
                body: json!({
                    "rollup_id": rollup.id,
                    "window_after": label,
                    "doc_count": bucket.doc_count,
                    "dimensions": dimensions,
                    "metrics": metrics,
                }),
            }
        })
        .collect())
}
