//! Benchmark persistence: result records, the on-disk store and summary
//! statistics.

mod model;
pub mod stats;
mod store;

pub use model::{
    BenchmarkFilter, BenchmarkResult, BenchmarkRun, ResultMetadata, RunIndex, RunSummary,
};
pub use stats::{MetricAggregate, TimingSummary};
pub use store::{BenchmarkStore, INDEX_FILENAME, RunRecorder, models_in};
