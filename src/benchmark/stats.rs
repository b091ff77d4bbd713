//! Summary statistics over metric values and raw timings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate of one metric over several results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; 0 for a single value.
    pub std: f64,
    pub count: usize,
}

impl MetricAggregate {
    /// `None` when there are no finite values.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };
        let std = if count > 1 {
            let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        Some(Self {
            mean,
            median,
            min: sorted[0],
            max: sorted[count - 1],
            std,
            count,
        })
    }
}

/// Latency distribution of one mode over a batch of queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub count: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl TimingSummary {
    pub fn from_samples(samples_ms: &[u64]) -> Option<Self> {
        let values: Vec<f64> = samples_ms.iter().map(|&v| v as f64).collect();
        let agg = MetricAggregate::from_values(&values)?;

        let mut sorted = values;
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            count: agg.count,
            avg_ms: agg.mean,
            p50_ms: agg.median,
            p95_ms: nearest_rank(&sorted, 0.95),
            p99_ms: nearest_rank(&sorted, 0.99),
            std_ms: agg.std,
            min_ms: agg.min,
            max_ms: agg.max,
        })
    }

    /// Metric names used in benchmark results. `avg_response_ms` is the
    /// default comparison metric.
    pub fn into_metrics(self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("count".to_string(), self.count as f64),
            ("avg_response_ms".to_string(), self.avg_ms),
            ("median_response_ms".to_string(), self.p50_ms),
            ("p95_ms".to_string(), self.p95_ms),
            ("p99_ms".to_string(), self.p99_ms),
            ("std_ms".to_string(), self.std_ms),
            ("min_ms".to_string(), self.min_ms),
            ("max_ms".to_string(), self.max_ms),
        ])
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
