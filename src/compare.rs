//! Cross-model comparison, metric trends and the markdown report built from
//! the benchmark store.

use crate::benchmark::{BenchmarkFilter, BenchmarkResult, BenchmarkStore, MetricAggregate};
use crate::error::Result;
use crate::modes::ModeName;
use crate::persistence::write_text_atomic;
use crate::scoring::ScoringMethod;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Metric compared when none is configured.
pub const DEFAULT_METRIC: &str = "avg_response_ms";

/// Quality metrics listed per model in the report.
const QUALITY_METRICS: [&str; 3] = ["faithfulness", "relevancy", "context_precision"];

/// Outcome of a lookup that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Lookup<T> {
    Found(T),
    NoData(NoData),
}

impl<T> Lookup<T> {
    fn no_data(reason: impl Into<String>) -> Self {
        Lookup::NoData(NoData {
            reason: reason.into(),
        })
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NoData(_) => None,
        }
    }
}

/// Why a lookup came back empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoData {
    pub reason: String,
}

/// One side of a comparison row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Measurement {
    Value(f64),
    NoData,
}

impl Measurement {
    pub fn value(&self) -> Option<f64> {
        match self {
            Measurement::Value(v) => Some(*v),
            Measurement::NoData => None,
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Measurement::Value(v) => write!(f, "{:.2}", v),
            Measurement::NoData => write!(f, "no data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub test_name: String,
    pub value_a: Measurement,
    pub value_b: Measurement,
    /// `b - a`, when both sides have data.
    pub delta: Option<f64>,
    /// `delta / a * 100`; undefined when `a` is 0 and the values differ.
    pub delta_pct: Option<f64>,
    pub methods_a: BTreeSet<ScoringMethod>,
    pub methods_b: BTreeSet<ScoringMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTable {
    pub model_a: String,
    pub model_b: String,
    pub metric: String,
    pub mode: Option<ModeName>,
    /// Sorted by test name.
    pub rows: Vec<ComparisonRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub mode: ModeName,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSeries {
    pub model_id: String,
    pub test_name: String,
    pub metric: String,
    /// Oldest first.
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendSummary {
    pub first: f64,
    pub latest: f64,
    pub change: f64,
    /// Undefined when the first value is 0.
    pub change_pct: Option<f64>,
}

impl TrendSeries {
    /// First/latest comparison; needs at least two points.
    pub fn summary(&self) -> Option<TrendSummary> {
        if self.points.len() < 2 {
            return None;
        }
        let first = self.points.first()?.value;
        let latest = self.points.last()?.value;
        let change = latest - first;
        Some(TrendSummary {
            first,
            latest,
            change,
            change_pct: percent_change(first, change),
        })
    }
}

fn fmt_pct(pct: Option<f64>) -> String {
    pct.map_or_else(|| "n/a".to_string(), |p| format!("{:+.1}%", p))
}

fn percent_change(base: f64, delta: f64) -> Option<f64> {
    if delta == 0.0 {
        Some(0.0)
    } else if base == 0.0 {
        None
    } else {
        Some(delta / base * 100.0)
    }
}

/// Per-test aggregate of one model's results.
#[derive(Default)]
struct TestGroup {
    values: Vec<f64>,
    methods: BTreeSet<ScoringMethod>,
}

impl TestGroup {
    fn measurement(&self) -> Measurement {
        MetricAggregate::from_values(&self.values)
            .map_or(Measurement::NoData, |agg| Measurement::Value(agg.mean))
    }
}

fn group_by_test(results: &[BenchmarkResult], metric: &str) -> BTreeMap<String, TestGroup> {
    let mut groups: BTreeMap<String, TestGroup> = BTreeMap::new();
    for result in results {
        let group = groups.entry(result.test_name.clone()).or_default();
        if let Some(value) = result.metric(metric) {
            group.values.push(value);
        }
        if let Some(method) = result.metadata.scoring_method {
            group.methods.insert(method);
        }
    }
    groups
}

/// Read-only analysis over a [`BenchmarkStore`].
pub struct ComparisonEngine<'a> {
    store: &'a BenchmarkStore,
    metric: String,
}

impl<'a> ComparisonEngine<'a> {
    pub fn new(store: &'a BenchmarkStore) -> Self {
        Self {
            store,
            metric: DEFAULT_METRIC.to_string(),
        }
    }

    /// Compare on `metric` instead of the default.
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Mean of the configured metric per test for two models.
    pub fn compare(
        &self,
        model_a: &str,
        model_b: &str,
        mode: Option<ModeName>,
    ) -> Result<Lookup<ComparisonTable>> {
        let filter_for = |model: &str| {
            let mut filter = BenchmarkFilter::new().model(model);
            filter.mode = mode;
            filter
        };
        let filter_a = filter_for(model_a);
        let filter_b = filter_for(model_b);
        filter_a.validate()?;
        filter_b.validate()?;
        BenchmarkFilter::new().metric(self.metric.as_str()).validate()?;

        let results_a = self.store.query(&filter_a)?;
        let results_b = self.store.query(&filter_b)?;
        if results_a.is_empty() && results_b.is_empty() {
            return Ok(Lookup::no_data(format!(
                "no benchmark results for {} or {}",
                model_a, model_b
            )));
        }

        let mut groups_a = group_by_test(&results_a, &self.metric);
        let mut groups_b = group_by_test(&results_b, &self.metric);
        let tests: BTreeSet<String> = groups_a.keys().chain(groups_b.keys()).cloned().collect();

        let rows = tests
            .into_iter()
            .map(|test_name| {
                let a = groups_a.remove(&test_name).unwrap_or_default();
                let b = groups_b.remove(&test_name).unwrap_or_default();
                let value_a = a.measurement();
                let value_b = b.measurement();
                let (delta, delta_pct) = match (value_a.value(), value_b.value()) {
                    (Some(va), Some(vb)) => {
                        let delta = vb - va;
                        (Some(delta), percent_change(va, delta))
                    }
                    _ => (None, None),
                };
                ComparisonRow {
                    test_name,
                    value_a,
                    value_b,
                    delta,
                    delta_pct,
                    methods_a: a.methods,
                    methods_b: b.methods,
                }
            })
            .collect();

        Ok(Lookup::Found(ComparisonTable {
            model_a: model_a.to_string(),
            model_b: model_b.to_string(),
            metric: self.metric.clone(),
            mode,
            rows,
        }))
    }

    /// Values of `metric` for one model and test over time.
    pub fn trend(
        &self,
        model_id: &str,
        test_name: &str,
        metric: &str,
        mode: Option<ModeName>,
    ) -> Result<Lookup<TrendSeries>> {
        let mut filter = BenchmarkFilter::new()
            .model(model_id)
            .test(test_name)
            .metric(metric);
        filter.mode = mode;

        let results = self.store.query(&filter)?;
        let points: Vec<TrendPoint> = results
            .iter()
            .filter_map(|r| {
                r.metric(metric).map(|value| TrendPoint {
                    timestamp: r.timestamp,
                    mode: r.mode_name,
                    value,
                })
            })
            .collect();

        if points.is_empty() {
            return Ok(Lookup::no_data(format!(
                "no '{}' values for {} on {}",
                metric, model_id, test_name
            )));
        }

        Ok(Lookup::Found(TrendSeries {
            model_id: model_id.to_string(),
            test_name: test_name.to_string(),
            metric: metric.to_string(),
            points,
        }))
    }

    /// Markdown summary of every model in the store, followed by pairwise
    /// comparison tables and per-test trends. Only the header line depends
    /// on `generated_at`.
    pub fn report(&self, generated_at: DateTime<Utc>) -> Result<String> {
        let index = self.store.index()?;
        let results = self.store.query(&BenchmarkFilter::new())?;

        let mut out = String::new();
        let _ = writeln!(out, "# Benchmark Comparison Report");
        let _ = writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "Total Runs: {}", index.runs.len());
        let _ = writeln!(out);

        if results.is_empty() {
            let _ = writeln!(out, "No benchmark data available.");
            return Ok(out);
        }

        let mut by_model: BTreeMap<&str, Vec<&BenchmarkResult>> = BTreeMap::new();
        for result in &results {
            by_model.entry(result.model_id.as_str()).or_default().push(result);
        }

        let _ = writeln!(out, "## Summary by Model");
        let _ = writeln!(out);
        for (model, results) in &by_model {
            let _ = writeln!(out, "### {}", model);
            let _ = writeln!(out, "Total results: {}", results.len());
            let _ = writeln!(out);

            let mut by_mode: BTreeMap<ModeName, Vec<f64>> = BTreeMap::new();
            for result in results {
                if let Some(value) = result.metric(&self.metric) {
                    by_mode.entry(result.mode_name).or_default().push(value);
                }
            }
            if !by_mode.is_empty() {
                let _ = writeln!(out, "**Average {} by mode:**", self.metric);
                for (mode, values) in &by_mode {
                    if let Some(agg) = MetricAggregate::from_values(values) {
                        let _ = writeln!(out, "- {}: {:.2} (n={})", mode, agg.mean, agg.count);
                    }
                }
                let _ = writeln!(out);
            }

            let quality: Vec<(&str, MetricAggregate)> = QUALITY_METRICS
                .iter()
                .filter_map(|&name| {
                    let values: Vec<f64> = results.iter().filter_map(|r| r.metric(name)).collect();
                    MetricAggregate::from_values(&values).map(|agg| (name, agg))
                })
                .collect();
            if !quality.is_empty() {
                let methods: BTreeSet<String> = results
                    .iter()
                    .filter_map(|r| r.metadata.scoring_method)
                    .map(|m| m.to_string())
                    .collect();
                let _ = writeln!(out, "**Answer quality:**");
                for (name, agg) in &quality {
                    let _ = writeln!(out, "- {}: {:.3} (n={})", name, agg.mean, agg.count);
                }
                if !methods.is_empty() {
                    let methods: Vec<String> = methods.into_iter().collect();
                    let _ = writeln!(out, "- scoring: {}", methods.join(", "));
                }
                let _ = writeln!(out);
            }
        }

        let models: Vec<&str> = by_model.keys().copied().collect();
        if models.len() > 1 {
            let _ = writeln!(out, "## Model Comparisons ({})", self.metric);
            let _ = writeln!(out);
            for (i, model_a) in models.iter().enumerate() {
                for model_b in &models[i + 1..] {
                    let Lookup::Found(table) = self.compare(model_a, model_b, None)? else {
                        continue;
                    };
                    render_table(&mut out, &table);
                }
            }
        }

        let mut trend_lines = Vec::new();
        for (model, results) in &by_model {
            let tests: BTreeSet<&str> = results.iter().map(|r| r.test_name.as_str()).collect();
            for test in tests {
                let Lookup::Found(series) = self.trend(model, test, &self.metric, None)? else {
                    continue;
                };
                if let Some(summary) = series.summary() {
                    trend_lines.push(format!(
                        "- {} / {}: {:.2} -> {:.2} ({}, n={})",
                        model,
                        test,
                        summary.first,
                        summary.latest,
                        fmt_pct(summary.change_pct),
                        series.points.len()
                    ));
                }
            }
        }
        if !trend_lines.is_empty() {
            let _ = writeln!(out, "## Trends ({})", self.metric);
            let _ = writeln!(out);
            for line in &trend_lines {
                let _ = writeln!(out, "{}", line);
            }
            let _ = writeln!(out);
        }

        Ok(out)
    }

    /// Render the report and write it to `path`.
    pub fn write_report(&self, path: &Path, generated_at: DateTime<Utc>) -> Result<String> {
        let report = self.report(generated_at)?;
        write_text_atomic(&report, path)?;
        info!(path = %path.display(), "wrote benchmark report");
        Ok(report)
    }
}

fn render_table(out: &mut String, table: &ComparisonTable) {
    let _ = writeln!(out, "### {} vs {}", table.model_a, table.model_b);
    let _ = writeln!(out);
    let _ = writeln!(out, "| Test | {} | {} | Delta | Delta % |", table.model_a, table.model_b);
    let _ = writeln!(out, "|---|---|---|---|---|");
    for row in &table.rows {
        let (delta, delta_pct) = match row.delta {
            Some(d) => (format!("{:+.2}", d), fmt_pct(row.delta_pct)),
            None => ("-".to_string(), "-".to_string()),
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            row.test_name, row.value_a, row.value_b, delta, delta_pct
        );
    }
    let _ = writeln!(out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::ResultMetadata;
    use crate::error::EvalError;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn result(test: &str, mode: ModeName, model: &str, secs: i64, metrics: &[(&str, f64)]) -> BenchmarkResult {
        let metrics = metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        BenchmarkResult::new(test, mode, model, metrics).with_timestamp(at(secs))
    }

    fn seeded() -> (TempDir, BenchmarkStore) {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        let ms = DEFAULT_METRIC;
        store.append("run_1", result("latency", ModeName::Basic, "m1", 0, &[(ms, 1000.0)])).unwrap();
        store.append("run_1", result("latency", ModeName::Basic, "m1", 10, &[(ms, 2000.0)])).unwrap();
        store.append("run_1", result("accuracy", ModeName::Basic, "m1", 20, &[(ms, 500.0)])).unwrap();
        store.append("run_2", result("accuracy", ModeName::Basic, "m2", 30, &[(ms, 750.0)])).unwrap();
        (dir, store)
    }

    #[test]
    fn test_compare_is_reflexive() {
        let (_dir, store) = seeded();
        let engine = ComparisonEngine::new(&store);

        let table = engine.compare("m1", "m1", None).unwrap().found().unwrap();
        assert_eq!(table.rows.len(), 2);
        for row in &table.rows {
            assert_eq!(row.delta, Some(0.0));
            assert_eq!(row.delta_pct, Some(0.0));
        }
    }

    #[test]
    fn test_missing_side_is_no_data_row() {
        let (_dir, store) = seeded();
        let engine = ComparisonEngine::new(&store);

        let table = engine.compare("m1", "m2", Some(ModeName::Basic)).unwrap().found().unwrap();
        let names: Vec<&str> = table.rows.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["accuracy", "latency"]);

        let latency = &table.rows[1];
        assert_eq!(latency.value_a, Measurement::Value(1500.0));
        assert_eq!(latency.value_b, Measurement::NoData);
        assert_eq!(latency.delta, None);

        let accuracy = &table.rows[0];
        assert_eq!(accuracy.delta, Some(250.0));
        assert_eq!(accuracy.delta_pct, Some(50.0));
    }

    #[test]
    fn test_compare_unknown_models_is_no_data() {
        let (_dir, store) = seeded();
        let engine = ComparisonEngine::new(&store);
        assert!(matches!(
            engine.compare("x", "y", None).unwrap(),
            Lookup::NoData(_)
        ));
    }

    #[test]
    fn test_blank_arguments_are_invalid() {
        let (_dir, store) = seeded();
        let engine = ComparisonEngine::new(&store);
        assert!(matches!(
            engine.compare("", "m2", None),
            Err(EvalError::InvalidFilter(_))
        ));
        assert!(matches!(
            engine.trend("m1", "latency", " ", None),
            Err(EvalError::InvalidFilter(_))
        ));
        assert!(matches!(
            ComparisonEngine::new(&store).with_metric("").compare("m1", "m2", None),
            Err(EvalError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_delta_pct_undefined_for_zero_base() {
        assert_eq!(percent_change(0.0, 5.0), None);
        assert_eq!(percent_change(0.0, 0.0), Some(0.0));
        assert_eq!(percent_change(200.0, -50.0), Some(-25.0));
    }

    #[test]
    fn test_rows_carry_scoring_methods() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        let metadata = ResultMetadata {
            scoring_method: Some(ScoringMethod::Fallback),
            ..ResultMetadata::default()
        };
        store
            .append(
                "run_q",
                result("quality", ModeName::Assistant, "m1", 0, &[("faithfulness", 0.8)])
                    .with_metadata(metadata),
            )
            .unwrap();

        let engine = ComparisonEngine::new(&store).with_metric("faithfulness");
        let table = engine.compare("m1", "m1", None).unwrap().found().unwrap();
        assert_eq!(table.rows[0].value_a, Measurement::Value(0.8));
        assert!(table.rows[0].methods_a.contains(&ScoringMethod::Fallback));
    }

    #[test]
    fn test_trend_is_time_ordered() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        let ms = DEFAULT_METRIC;
        store.append("run_b", result("latency", ModeName::Basic, "m1", 50, &[(ms, 900.0)])).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m1", 5, &[(ms, 1200.0)])).unwrap();
        store.append("run_c", result("latency", ModeName::Basic, "m1", 25, &[(ms, 1000.0)])).unwrap();

        let series = ComparisonEngine::new(&store)
            .trend("m1", "latency", ms, Some(ModeName::Basic))
            .unwrap()
            .found()
            .unwrap();
        let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1200.0, 1000.0, 900.0]);

        let summary = series.summary().unwrap();
        assert_eq!(summary.first, 1200.0);
        assert_eq!(summary.latest, 900.0);
        assert_eq!(summary.change, -300.0);
        assert_eq!(summary.change_pct, Some(-25.0));
    }

    #[test]
    fn test_single_point_trend_has_no_summary() {
        let (_dir, store) = seeded();
        let series = ComparisonEngine::new(&store)
            .trend("m2", "accuracy", DEFAULT_METRIC, None)
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(series.points.len(), 1);
        assert!(series.summary().is_none());

        assert!(matches!(
            ComparisonEngine::new(&store)
                .trend("m2", "latency", DEFAULT_METRIC, None)
                .unwrap(),
            Lookup::NoData(_)
        ));
    }

    #[test]
    fn test_report_is_reproducible() {
        let (dir, store) = seeded();
        let engine = ComparisonEngine::new(&store);

        let first = engine.report(at(0)).unwrap();
        let second = engine.report(at(0)).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("### m1"));
        assert!(first.contains("- basic: 1166.67 (n=3)"));
        assert!(first.contains("Total Runs: 2"));
        assert!(first.contains("### m1 vs m2"));
        assert!(first.contains("| accuracy | 500.00 | 750.00 | +250.00 | +50.0% |"));
        assert!(first.contains("| latency | 1500.00 | no data | - | - |"));
        assert!(first.contains("- m1 / latency: 1000.00 -> 2000.00 (+100.0%, n=2)"));
        assert!(!first.contains("- m1 / accuracy"));

        let later = engine.report(at(3600)).unwrap();
        let body = |r: &str| r.lines().skip(2).collect::<Vec<_>>().join("\n");
        assert_eq!(body(&first), body(&later));

        let path = dir.path().join("reports").join("comparison.md");
        let written = engine.write_report(&path, at(0)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
    }

    #[test]
    fn test_report_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        let report = ComparisonEngine::new(&store).report(at(0)).unwrap();
        assert!(report.contains("No benchmark data available."));
    }
}
