//! Benchmark records, runs and the run index.

use crate::error::{EvalError, Result};
use crate::modes::ModeName;
use crate::scoring::ScoringMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Typed context attached to a benchmark result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Method behind any quality metrics in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_method: Option<ScoringMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// One timed (and possibly scored) query outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub timestamp: DateTime<Utc>,
    pub test_name: String,
    pub mode_name: ModeName,
    pub model_id: String,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl BenchmarkResult {
    /// New result stamped with the current time.
    pub fn new(
        test_name: impl Into<String>,
        mode_name: ModeName,
        model_id: impl Into<String>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            test_name: test_name.into(),
            mode_name,
            model_id: model_id.into(),
            metrics,
            metadata: ResultMetadata::default(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: ResultMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// JSON has no NaN or infinity, so such values would make the run file
    /// unreadable.
    pub fn validate(&self) -> Result<()> {
        match self.metrics.iter().find(|(_, v)| !v.is_finite()) {
            Some((name, value)) => Err(EvalError::InvalidMetric(format!(
                "'{}' is {} in test '{}'",
                name, value, self.test_name
            ))),
            None => Ok(()),
        }
    }
}

/// All results written under one run id. Stored as one JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub run_id: String,
    pub results: Vec<BenchmarkResult>,
}

impl BenchmarkRun {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            results: Vec::new(),
        }
    }
}

/// Coarse description of a run, kept in `index.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub model_ids: BTreeSet<String>,
    pub test_names: BTreeSet<String>,
    pub modes: BTreeSet<ModeName>,
    pub result_count: usize,
    /// Earliest and latest result timestamps.
    pub timestamp_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Size of the run file this summary was taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_len: Option<u64>,
}

impl RunSummary {
    pub fn from_run(run: &BenchmarkRun) -> Self {
        let mut summary = Self::default();
        for result in &run.results {
            summary.absorb(result);
        }
        summary
    }

    pub fn absorb(&mut self, result: &BenchmarkResult) {
        self.model_ids.insert(result.model_id.clone());
        self.test_names.insert(result.test_name.clone());
        self.modes.insert(result.mode_name);
        self.result_count += 1;
        self.timestamp_range = Some(match self.timestamp_range {
            None => (result.timestamp, result.timestamp),
            Some((start, end)) => (start.min(result.timestamp), end.max(result.timestamp)),
        });
    }

    /// Whether the run can hold results matching `filter`. Metric names are
    /// not indexed, so they never exclude a run here.
    pub fn may_match(&self, filter: &BenchmarkFilter) -> bool {
        filter
            .model_id
            .as_ref()
            .is_none_or(|m| self.model_ids.contains(m))
            && filter
                .test_name
                .as_ref()
                .is_none_or(|t| self.test_names.contains(t))
            && filter.mode.is_none_or(|m| self.modes.contains(&m))
    }
}

/// Serialized form of `index.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunIndex {
    pub runs: BTreeMap<String, RunSummary>,
}

/// Optional AND-combined filters for [`crate::benchmark::BenchmarkStore::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchmarkFilter {
    pub model_id: Option<String>,
    pub test_name: Option<String>,
    pub mode: Option<ModeName>,
    pub metric: Option<String>,
}

impl BenchmarkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn test(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = Some(test_name.into());
        self
    }

    pub fn mode(mut self, mode: ModeName) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    /// Reject blank filter values; they are always a caller mistake.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("model_id", &self.model_id),
            ("test_name", &self.test_name),
            ("metric", &self.metric),
        ] {
            if let Some(v) = value {
                if v.trim().is_empty() {
                    return Err(EvalError::InvalidFilter(format!("{} must not be blank", name)));
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, result: &BenchmarkResult) -> bool {
        self.model_id.as_ref().is_none_or(|m| &result.model_id == m)
            && self.test_name.as_ref().is_none_or(|t| &result.test_name == t)
            && self.mode.is_none_or(|m| result.mode_name == m)
            && self
                .metric
                .as_ref()
                .is_none_or(|k| result.metrics.contains_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(test: &str, mode: ModeName, model: &str, secs: i64) -> BenchmarkResult {
        BenchmarkResult::new(
            test,
            mode,
            model,
            BTreeMap::from([("avg_response_ms".to_string(), 1200.0)]),
        )
        .with_timestamp(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn test_summary_absorbs_results() {
        let mut run = BenchmarkRun::new("benchmark_1");
        run.results.push(result("latency", ModeName::Basic, "m1", 10));
        run.results.push(result("accuracy", ModeName::Deep, "m2", 5));

        let summary = RunSummary::from_run(&run);
        assert_eq!(summary.result_count, 2);
        assert!(summary.model_ids.contains("m1") && summary.model_ids.contains("m2"));
        assert_eq!(summary.modes.len(), 2);
        let (start, end) = summary.timestamp_range.unwrap();
        assert!(start < end);
        assert_eq!(start, run.results[1].timestamp);
    }

    #[test]
    fn test_filter_matches() {
        let r = result("latency", ModeName::Basic, "m1", 0);
        assert!(BenchmarkFilter::new().matches(&r));
        assert!(BenchmarkFilter::new().model("m1").mode(ModeName::Basic).matches(&r));
        assert!(!BenchmarkFilter::new().model("m2").matches(&r));
        assert!(BenchmarkFilter::new().metric("avg_response_ms").matches(&r));
        assert!(!BenchmarkFilter::new().metric("faithfulness").matches(&r));
    }

    #[test]
    fn test_blank_filter_is_invalid() {
        assert!(matches!(
            BenchmarkFilter::new().test("  ").validate(),
            Err(EvalError::InvalidFilter(_))
        ));
        assert!(BenchmarkFilter::new().test("latency").validate().is_ok());
    }

    #[test]
    fn test_may_match_ignores_metric() {
        let mut run = BenchmarkRun::new("r");
        run.results.push(result("latency", ModeName::Basic, "m1", 0));
        let summary = RunSummary::from_run(&run);

        assert!(summary.may_match(&BenchmarkFilter::new().metric("anything")));
        assert!(!summary.may_match(&BenchmarkFilter::new().mode(ModeName::Both)));
    }

    #[test]
    fn test_non_finite_metric_is_invalid() {
        let ok = result("latency", ModeName::Basic, "m1", 0);
        assert!(ok.validate().is_ok());

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut r = ok.clone();
            r.metrics.insert("faithfulness".to_string(), bad);
            assert!(matches!(r.validate(), Err(EvalError::InvalidMetric(_))));
        }
    }

    #[test]
    fn test_result_json_shape() {
        let r = result("latency", ModeName::Assistant, "m1", 0);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["mode_name"], "assistant");
        assert_eq!(json["model_id"], "m1");
        assert_eq!(json["metrics"]["avg_response_ms"], 1200.0);
        assert!(json["timestamp"].as_str().unwrap().starts_with("2023-11-14T"));
    }
}
