//! Append-only benchmark store.
//!
//! Layout: one `<run_id>.json` file per run plus `index.json`, a cache of
//! per-run summaries. Run files are the source of truth; the index is rebuilt
//! from them whenever it is missing, unreadable or out of step. Each summary
//! records the size of its run file, so a run appended after the index was
//! last written is detected as stale.

use super::model::{
    BenchmarkFilter, BenchmarkResult, BenchmarkRun, ResultMetadata, RunIndex, RunSummary,
};
use crate::error::{EvalError, Result};
use crate::modes::ModeName;
use crate::persistence::{file_exists, read_json, write_json_atomic};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name of the run index inside the store directory.
pub const INDEX_FILENAME: &str = "index.json";

/// Benchmark results on disk.
///
/// Appends to the store are serialized by the writer lock; the cached index
/// sits behind its own lock, always taken after the writer lock.
pub struct BenchmarkStore {
    dir: PathBuf,
    writer: Mutex<()>,
    index: Mutex<Option<RunIndex>>,
}

impl BenchmarkStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| EvalError::io(&dir, e))?;
        debug!(dir = %dir.display(), "opened benchmark store");
        Ok(Self {
            dir,
            writer: Mutex::new(()),
            index: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh run id of the form `benchmark_YYYYMMDD_HHMMSS`.
    pub fn new_run_id() -> String {
        format!("benchmark_{}", Utc::now().format("%Y%m%d_%H%M%S"))
    }

    /// Run ids become file names: letters, digits, `-` and `_` only.
    pub fn validate_run_id(run_id: &str) -> Result<()> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            && run_id != index_stem();
        if valid {
            Ok(())
        } else {
            Err(EvalError::InvalidRunId(run_id.to_string()))
        }
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILENAME)
    }

    /// Append one result to `run_id`, creating the run on first use.
    /// Results with non-finite metrics are rejected before anything is
    /// written.
    pub fn append(&self, run_id: &str, result: BenchmarkResult) -> Result<()> {
        Self::validate_run_id(run_id)?;
        result.validate()?;
        let _writer = self.writer.lock();

        // Bring the index up to date before the run file changes, so the
        // incremental update below never counts this result twice.
        self.refresh_index()?;

        let path = self.run_path(run_id);
        let mut run = if file_exists(&path) {
            self.read_run(&path)?
        } else {
            info!(run_id, "starting benchmark run");
            BenchmarkRun::new(run_id)
        };

        debug!(
            run_id,
            test = %result.test_name,
            mode = %result.mode_name,
            model = %result.model_id,
            "appending benchmark result"
        );
        run.results.push(result);
        write_json_atomic(&run, &path)?;

        let mut index = self.index.lock();
        let written = match (index.as_mut(), run.results.last()) {
            (Some(cached), Some(last)) => fs::metadata(&path)
                .map_err(|e| EvalError::io(&path, e))
                .and_then(|meta| {
                    let summary = cached.runs.entry(run_id.to_string()).or_default();
                    summary.absorb(last);
                    summary.file_len = Some(meta.len());
                    write_json_atomic(&*cached, &self.index_path())
                }),
            _ => Ok(()),
        };
        if let Err(e) = written {
            // The on-disk index no longer matches the run file sizes, so the
            // next refresh rebuilds it.
            warn!(error = %e, "failed to write benchmark index; it will be rebuilt");
            *index = None;
        }

        Ok(())
    }

    /// Results matching every set field of `filter`, oldest first. Ties keep
    /// run and insertion order.
    pub fn query(&self, filter: &BenchmarkFilter) -> Result<Vec<BenchmarkResult>> {
        filter.validate()?;
        let index = self.index()?;

        let mut results = Vec::new();
        for (run_id, summary) in &index.runs {
            if !summary.may_match(filter) {
                continue;
            }
            let run = self.load_run(run_id)?;
            results.extend(run.results.into_iter().filter(|r| filter.matches(r)));
        }

        results.sort_by_key(|r| r.timestamp);
        Ok(results)
    }

    /// Per-run summaries, rebuilt from the run files if the cache is stale.
    pub fn index(&self) -> Result<RunIndex> {
        let _writer = self.writer.lock();
        self.refresh_index()?;
        Ok(self.index.lock().clone().unwrap_or_default())
    }

    /// Ids of all runs in the store.
    pub fn runs(&self) -> Result<Vec<String>> {
        Ok(self.index()?.runs.into_keys().collect())
    }

    /// Regenerate `index.json` from the run files.
    pub fn rebuild_index(&self) -> Result<RunIndex> {
        let _writer = self.writer.lock();
        let rebuilt = self.scan_runs()?;
        write_json_atomic(&rebuilt, &self.index_path())?;
        *self.index.lock() = Some(rebuilt.clone());
        info!(runs = rebuilt.runs.len(), "rebuilt benchmark index");
        Ok(rebuilt)
    }

    /// Load one run by id.
    pub fn load_run(&self, run_id: &str) -> Result<BenchmarkRun> {
        Self::validate_run_id(run_id)?;
        self.read_run(&self.run_path(run_id))
    }

    /// A recorder that appends results for one model to a new run.
    pub fn recorder(&self, model_id: impl Into<String>) -> RunRecorder<'_> {
        RunRecorder {
            store: self,
            run_id: Self::new_run_id(),
            model_id: model_id.into(),
        }
    }

    fn read_run(&self, path: &Path) -> Result<BenchmarkRun> {
        let data = fs::read(path).map_err(|e| EvalError::io(path, e))?;
        serde_json::from_slice(&data).map_err(|e| EvalError::corruption(path, e))
    }

    /// Caller must hold the writer lock.
    fn refresh_index(&self) -> Result<()> {
        let on_disk = self.run_files()?;
        let mut index = self.index.lock();

        if index.is_none() {
            let path = self.index_path();
            if file_exists(&path) {
                match read_json::<RunIndex>(&path) {
                    Ok(loaded) => *index = Some(loaded),
                    Err(e) => warn!(error = %e, "benchmark index unreadable"),
                }
            }
        }

        let fresh = index.as_ref().is_some_and(|cached| {
            cached.runs.len() == on_disk.len()
                && cached
                    .runs
                    .iter()
                    .zip(&on_disk)
                    .all(|((id, summary), (file_id, file))| {
                        id == file_id && summary.file_len == Some(file.len)
                    })
        });
        if fresh {
            return Ok(());
        }

        warn!(
            runs = on_disk.len(),
            "benchmark index missing or stale; rebuilding from run files"
        );
        let rebuilt = self.summarize(&on_disk)?;
        if let Err(e) = write_json_atomic(&rebuilt, &self.index_path()) {
            warn!(error = %e, "failed to write rebuilt benchmark index");
        }
        *index = Some(rebuilt);
        Ok(())
    }

    fn scan_runs(&self) -> Result<RunIndex> {
        let on_disk = self.run_files()?;
        self.summarize(&on_disk)
    }

    fn summarize(&self, files: &BTreeMap<String, RunFile>) -> Result<RunIndex> {
        let mut runs = BTreeMap::new();
        for (run_id, file) in files {
            let run = self.read_run(&file.path)?;
            let mut summary = RunSummary::from_run(&run);
            summary.file_len = Some(file.len);
            runs.insert(run_id.clone(), summary);
        }
        Ok(RunIndex { runs })
    }

    /// Run files keyed by run id. Skips the index, temp files and anything
    /// whose stem is not a valid run id.
    fn run_files(&self) -> Result<BTreeMap<String, RunFile>> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| EvalError::io(&self.dir, io::Error::from(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if Self::validate_run_id(stem).is_ok() {
                let len = entry
                    .metadata()
                    .map_err(|e| EvalError::io(path, io::Error::from(e)))?
                    .len();
                files.insert(
                    stem.to_string(),
                    RunFile {
                        path: path.to_path_buf(),
                        len,
                    },
                );
            }
        }
        Ok(files)
    }
}

struct RunFile {
    path: PathBuf,
    len: u64,
}

fn index_stem() -> &'static str {
    INDEX_FILENAME.trim_end_matches(".json")
}

/// Appends results for one model to one run.
pub struct RunRecorder<'a> {
    store: &'a BenchmarkStore,
    run_id: String,
    model_id: String,
}

impl RunRecorder<'_> {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Record one result timestamped now.
    pub fn record(
        &self,
        test_name: &str,
        mode: ModeName,
        metrics: BTreeMap<String, f64>,
        metadata: ResultMetadata,
    ) -> Result<()> {
        let result =
            BenchmarkResult::new(test_name, mode, self.model_id.clone(), metrics).with_metadata(metadata);
        self.store.append(&self.run_id, result)
    }
}

/// Distinct model ids across an index.
pub fn models_in(index: &RunIndex) -> BTreeSet<String> {
    index
        .runs
        .values()
        .flat_map(|s| s.model_ids.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn result(test: &str, mode: ModeName, model: &str, secs: i64, ms: f64) -> BenchmarkResult {
        BenchmarkResult::new(
            test,
            mode,
            model,
            BTreeMap::from([("avg_response_ms".to_string(), ms)]),
        )
        .with_timestamp(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn test_append_and_query_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();

        let r = result("latency", ModeName::Basic, "m1", 0, 1500.0);
        store.append("run_a", r.clone()).unwrap();

        let found = store.query(&BenchmarkFilter::new().model("m1")).unwrap();
        assert_eq!(found, vec![r]);
        assert!(dir.path().join("run_a.json").exists());
        assert!(dir.path().join(INDEX_FILENAME).exists());
    }

    #[test]
    fn test_query_orders_by_timestamp_across_calls() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();

        store.append("run_a", result("latency", ModeName::Basic, "m1", 30, 1.0)).unwrap();
        store.append("run_a", result("latency", ModeName::Deep, "m1", 10, 2.0)).unwrap();
        store.append("run_b", result("latency", ModeName::Basic, "m1", 20, 3.0)).unwrap();
        store.append("run_b", result("accuracy", ModeName::Basic, "m2", 0, 4.0)).unwrap();

        let all = store.query(&BenchmarkFilter::new()).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let m1 = store.query(&BenchmarkFilter::new().model("m1")).unwrap();
        let values: Vec<f64> = m1.iter().map(|r| r.metrics["avg_response_ms"]).collect();
        assert_eq!(values, vec![2.0, 3.0, 1.0]);

        let deep = store
            .query(&BenchmarkFilter::new().model("m1").mode(ModeName::Deep))
            .unwrap();
        assert_eq!(deep.len(), 1);
    }

    #[test]
    fn test_reopened_store_sees_results() {
        let dir = TempDir::new().unwrap();
        {
            let store = BenchmarkStore::open(dir.path()).unwrap();
            store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();
        }
        let store = BenchmarkStore::open(dir.path()).unwrap();
        assert_eq!(store.query(&BenchmarkFilter::new()).unwrap().len(), 1);
        assert_eq!(store.runs().unwrap(), vec!["run_a".to_string()]);
    }

    #[test]
    fn test_corrupt_run_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();

        fs::write(dir.path().join("run_a.json"), "{ truncated").unwrap();

        assert!(matches!(
            store.load_run("run_a"),
            Err(EvalError::StoreCorruption { .. })
        ));
        assert!(matches!(
            store.query(&BenchmarkFilter::new()),
            Err(EvalError::StoreCorruption { .. })
        ));
    }

    #[test]
    fn test_missing_index_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        {
            let store = BenchmarkStore::open(dir.path()).unwrap();
            store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();
            store.append("run_b", result("latency", ModeName::Both, "m2", 1, 2.0)).unwrap();
        }
        fs::remove_file(dir.path().join(INDEX_FILENAME)).unwrap();

        let store = BenchmarkStore::open(dir.path()).unwrap();
        let index = store.index().unwrap();
        assert_eq!(index.runs.len(), 2);
        assert_eq!(index.runs["run_b"].result_count, 1);
        assert!(dir.path().join(INDEX_FILENAME).exists());
        assert_eq!(models_in(&index).len(), 2);
    }

    #[test]
    fn test_unindexed_run_file_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();

        let mut copied = BenchmarkRun::new("run_c");
        copied.results.push(result("latency", ModeName::Basic, "m3", 5, 9.0));
        write_json_atomic(&copied, &dir.path().join("run_c.json")).unwrap();

        let found = store.query(&BenchmarkFilter::new().model("m3")).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_non_finite_metric_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 100.0)).unwrap();
        let before = fs::read(dir.path().join("run_a.json")).unwrap();

        for bad in [f64::NAN, f64::INFINITY] {
            assert!(matches!(
                store.append("run_a", result("latency", ModeName::Basic, "m1", 1, bad)),
                Err(EvalError::InvalidMetric(_))
            ));
        }

        assert_eq!(fs::read(dir.path().join("run_a.json")).unwrap(), before);
        assert_eq!(store.query(&BenchmarkFilter::new()).unwrap().len(), 1);
        store.append("run_a", result("latency", ModeName::Basic, "m1", 2, 200.0)).unwrap();
        assert_eq!(store.load_run("run_a").unwrap().results.len(), 2);
    }

    #[test]
    fn test_stale_index_after_crash_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join(INDEX_FILENAME);
        {
            let store = BenchmarkStore::open(dir.path()).unwrap();
            store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();
            let old_index = fs::read(&index_path).unwrap();
            store.append("run_a", result("latency", ModeName::Basic, "m2", 1, 2.0)).unwrap();
            // Run file renamed, index rename lost.
            fs::write(&index_path, old_index).unwrap();
        }

        let store = BenchmarkStore::open(dir.path()).unwrap();
        let found = store.query(&BenchmarkFilter::new().model("m2")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.index().unwrap().runs["run_a"].result_count, 2);
    }

    #[test]
    fn test_failed_index_write_does_not_hide_results() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();

        // A directory in the way of the index temp file makes the write fail.
        let blocker = dir.path().join(format!("{}.tmp", INDEX_FILENAME));
        fs::create_dir(&blocker).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m2", 1, 2.0)).unwrap();
        fs::remove_dir(&blocker).unwrap();

        assert_eq!(store.query(&BenchmarkFilter::new().model("m2")).unwrap().len(), 1);

        let reopened = BenchmarkStore::open(dir.path()).unwrap();
        assert_eq!(reopened.query(&BenchmarkFilter::new().model("m2")).unwrap().len(), 1);
        assert_eq!(reopened.index().unwrap().runs["run_a"].result_count, 2);
    }

    #[test]
    fn test_rebuild_index_matches_incremental() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        store.append("run_a", result("latency", ModeName::Basic, "m1", 0, 1.0)).unwrap();
        store.append("run_a", result("accuracy", ModeName::Deep, "m1", 1, 2.0)).unwrap();

        let incremental = store.index().unwrap();
        let rebuilt = store.rebuild_index().unwrap();
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn test_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BenchmarkStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let r = result("latency", ModeName::Basic, "m1", t * 100 + i, 1.0);
                        store.append("shared_run", r).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load_run("shared_run").unwrap().results.len(), 40);
        assert_eq!(store.index().unwrap().runs["shared_run"].result_count, 40);
    }

    #[test]
    fn test_invalid_run_ids() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        let r = result("latency", ModeName::Basic, "m1", 0, 1.0);

        for bad in ["", "../escape", "a b", "index"] {
            assert!(matches!(
                store.append(bad, r.clone()),
                Err(EvalError::InvalidRunId(_))
            ));
        }
        assert!(BenchmarkStore::validate_run_id(&BenchmarkStore::new_run_id()).is_ok());
    }

    #[test]
    fn test_blank_filter_rejected() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.query(&BenchmarkFilter::new().model("")),
            Err(EvalError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_recorder_appends_to_one_run() {
        let dir = TempDir::new().unwrap();
        let store = BenchmarkStore::open(dir.path()).unwrap();
        let recorder = store.recorder("qwen");

        let metadata = ResultMetadata {
            iterations: Some(3),
            ..ResultMetadata::default()
        };
        recorder
            .record("latency", ModeName::Basic, BTreeMap::new(), metadata.clone())
            .unwrap();
        recorder
            .record("latency", ModeName::Deep, BTreeMap::new(), metadata)
            .unwrap();

        let run = store.load_run(recorder.run_id()).unwrap();
        assert_eq!(run.results.len(), 2);
        assert!(run.results.iter().all(|r| r.model_id == "qwen"));
        assert!(recorder.run_id().starts_with("benchmark_"));
    }
}
