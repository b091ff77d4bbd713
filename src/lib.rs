//! RAG Eval Tracker - answer-quality scoring, benchmark history and human
//! validation for retrieval-augmented generation systems.
//!
//! # Overview
//!
//! 1. Score an answer against its retrieved contexts. A judge model is used
//!    when reachable; otherwise a deterministic lexical scorer takes over and
//!    the result records which method produced it.
//! 2. Append timed and scored results to a file-backed benchmark store,
//!    one JSON file per run.
//! 3. Compare models, follow a metric over time and render a markdown report.
//! 4. Queue answers for human review, auto-save the session and export the
//!    verdicts.
//!
//! # Quick Start
//!
//! ```no_run
//! use rag_eval_tracker::{
//!     benchmark::{BenchmarkStore, ResultMetadata},
//!     compare::{ComparisonEngine, Lookup},
//!     config::Config,
//!     modes::ModeName,
//!     scoring::AnswerScorer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let scorer = AnswerScorer::from_config(&config)?;
//!     let contexts = vec!["The dataset contains 1000 rows.".to_string()];
//!     let score = scorer
//!         .score("How many rows?", "There are 1000 rows.", &contexts)
//!         .await?;
//!
//!     let store = BenchmarkStore::open(&config.storage.benchmark_dir)?;
//!     let recorder = store.recorder(&config.default_model);
//!     let metadata = ResultMetadata {
//!         scoring_method: Some(score.method),
//!         ..Default::default()
//!     };
//!     recorder.record("row_count", ModeName::Basic, score.as_metrics(), metadata)?;
//!
//!     let engine = ComparisonEngine::new(&store).with_metric("faithfulness");
//!     if let Lookup::Found(table) = engine.compare("model-a", "model-b", None)? {
//!         println!("{} rows", table.rows.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **ModeRegistry**: the four query modes and their expected behaviour
//! - **AnswerScorer**: judge-or-lexical gate over the [`scoring::Scorer`] trait
//! - **BenchmarkStore**: append-only run files plus a rebuildable index
//! - **ComparisonEngine**: compare, trend and report over the store
//! - **ValidationSession**: human review with auto-save and export

pub mod benchmark;
pub mod compare;
pub mod config;
pub mod error;
pub mod llm;
pub mod modes;
pub mod persistence;
pub mod rag;
pub mod scoring;
pub mod validation;

// Re-export commonly used types
pub use benchmark::{BenchmarkFilter, BenchmarkResult, BenchmarkStore};
pub use compare::{ComparisonEngine, Lookup};
pub use config::Config;
pub use error::{EvalError, Result};
pub use llm::LlmClient;
pub use modes::{ModeName, ModeRegistry};
pub use scoring::{AnswerScorer, ScoreResult, ScoringMethod};
pub use validation::{ValidationExport, ValidationSession};
