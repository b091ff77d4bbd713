//! RAG Eval Tracker CLI
//!
//! Compare benchmark runs, follow metric trends, score answers and review
//! human validation exports.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rag_eval_tracker::{
    benchmark::{BenchmarkFilter, BenchmarkStore, MetricAggregate, ResultMetadata, models_in},
    compare::{ComparisonEngine, DEFAULT_METRIC, Lookup},
    config::Config,
    llm::LlmClient,
    modes::{ModeName, ModeRegistry, ModeSummary, mode_comparison_table},
    scoring::AnswerScorer,
    validation::{
        ValidationExport,
        review::{analyze, summarize},
    },
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// RAG Eval Tracker - answer scoring, benchmark history and human validation
#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two models test by test
    Compare {
        /// The two models to compare (A then B)
        #[arg(long, num_args = 2, required = true)]
        models: Vec<String>,

        /// Restrict to one mode
        #[arg(long)]
        mode: Option<ModeName>,

        /// Metric to compare
        #[arg(long, default_value = DEFAULT_METRIC)]
        metric: String,
    },

    /// Show how a metric changed over time
    Trend {
        /// Model id
        #[arg(long)]
        model: String,

        /// Test name
        #[arg(long)]
        test: String,

        /// Metric to follow
        #[arg(long, default_value = DEFAULT_METRIC)]
        metric: String,

        /// Restrict to one mode
        #[arg(long)]
        mode: Option<ModeName>,
    },

    /// Generate the markdown comparison report
    Report {
        /// Also write the report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the benchmark run index
    Index {
        /// Regenerate index.json from the run files first
        #[arg(long)]
        rebuild: bool,
    },

    /// List query modes and their recorded averages
    Modes,

    /// Score one answer against its contexts
    Score {
        /// The question that was asked
        #[arg(short, long)]
        question: String,

        /// The answer to score
        #[arg(short, long)]
        answer: String,

        /// Retrieved context passage (repeatable)
        #[arg(short, long = "context")]
        contexts: Vec<String>,

        /// Skip the judge model and score lexically
        #[arg(long)]
        fallback_only: bool,

        /// Append the scores to the benchmark store under this test name
        #[arg(long)]
        record: Option<String>,

        /// Mode recorded with the scores
        #[arg(long, default_value = "basic")]
        mode: ModeName,

        /// Model id recorded with the scores (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,
    },

    /// Summarize a validation export
    Review {
        /// Path to a validation_results_*.json file
        export: PathBuf,
    },

    /// Test LLM connection
    Test,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            models,
            mode,
            metric,
        } => cmd_compare(models, mode, metric),
        Commands::Trend {
            model,
            test,
            metric,
            mode,
        } => cmd_trend(model, test, metric, mode),
        Commands::Report { output } => cmd_report(output),
        Commands::Index { rebuild } => cmd_index(rebuild),
        Commands::Modes => cmd_modes(),
        Commands::Score {
            question,
            answer,
            contexts,
            fallback_only,
            record,
            mode,
            model,
        } => cmd_score(question, answer, contexts, fallback_only, record, mode, model).await,
        Commands::Review { export } => cmd_review(export),
        Commands::Test => cmd_test().await,
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<BenchmarkStore> {
    BenchmarkStore::open(&config.storage.benchmark_dir).with_context(|| {
        format!(
            "Failed to open benchmark store at '{}'",
            config.storage.benchmark_dir.display()
        )
    })
}

fn cmd_compare(models: Vec<String>, mode: Option<ModeName>, metric: String) -> Result<()> {
    let [model_a, model_b] = <[String; 2]>::try_from(models)
        .map_err(|_| anyhow::anyhow!("--models takes exactly two model ids"))?;

    let config = load_config()?;
    let store = open_store(&config)?;
    let engine = ComparisonEngine::new(&store).with_metric(metric);

    let table = match engine
        .compare(&model_a, &model_b, mode)
        .context("Comparison failed")?
    {
        Lookup::Found(table) => table,
        Lookup::NoData(no_data) => {
            println!("No benchmark data: {}", no_data.reason);
            return Ok(());
        }
    };

    println!("Comparing {} (A) vs {} (B)", table.model_a, table.model_b);
    println!(
        "  Metric: {}   Mode: {}",
        table.metric,
        table.mode.map_or_else(|| "all".to_string(), |m| m.to_string())
    );
    println!("{}", "─".repeat(80));
    println!(
        "{:<34} {:>12} {:>12} {:>18}",
        "Test", "A", "B", "Difference"
    );
    println!("{}", "─".repeat(80));

    for row in &table.rows {
        let diff = match (row.delta, row.delta_pct) {
            (Some(d), Some(p)) => format!("{:+.2} ({:+.1}%)", d, p),
            (Some(d), None) => format!("{:+.2}", d),
            _ => "-".to_string(),
        };
        let name: String = row.test_name.chars().take(33).collect();
        println!(
            "{:<34} {:>12} {:>12} {:>18}",
            name,
            row.value_a.to_string(),
            row.value_b.to_string(),
            diff
        );
    }

    println!("{}", "─".repeat(80));
    Ok(())
}

fn cmd_trend(model: String, test: String, metric: String, mode: Option<ModeName>) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config)?;
    let engine = ComparisonEngine::new(&store);

    let series = match engine
        .trend(&model, &test, &metric, mode)
        .context("Trend lookup failed")?
    {
        Lookup::Found(series) => series,
        Lookup::NoData(no_data) => {
            println!("No trend data: {}", no_data.reason);
            return Ok(());
        }
    };

    println!("Performance Trend");
    println!("  Model:  {}", series.model_id);
    println!("  Test:   {}", series.test_name);
    println!("  Metric: {}", series.metric);
    println!("{}", "─".repeat(50));
    for point in &series.points {
        println!(
            "{:<25} {:<10} {:>12.2}",
            point.timestamp.format("%Y-%m-%d %H:%M:%S"),
            point.mode,
            point.value
        );
    }

    if let Some(summary) = series.summary() {
        println!("{}", "─".repeat(50));
        println!("  First:  {:.2}", summary.first);
        println!("  Latest: {:.2}", summary.latest);
        match summary.change_pct {
            Some(pct) => println!("  Change: {:+.2} ({:+.1}%)", summary.change, pct),
            None => println!("  Change: {:+.2}", summary.change),
        }
    }

    Ok(())
}

fn cmd_report(output: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config)?;
    let engine = ComparisonEngine::new(&store);
    let now = Utc::now();

    let report = match &output {
        Some(path) => engine
            .write_report(path, now)
            .context("Failed to write report")?,
        None => engine.report(now).context("Failed to build report")?,
    };

    println!("{}", report);
    if let Some(path) = output {
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn cmd_index(rebuild: bool) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config)?;

    let index = if rebuild {
        store.rebuild_index().context("Failed to rebuild index")?
    } else {
        store.index().context("Failed to read index")?
    };

    if index.runs.is_empty() {
        println!("No benchmark runs in {}", store.dir().display());
        return Ok(());
    }

    println!("Benchmark Runs ({})", store.dir().display());
    println!("{}", "─".repeat(60));
    for (run_id, summary) in &index.runs {
        println!("{}", run_id);
        println!("  Results: {}", summary.result_count);
        println!(
            "  Models:  {}",
            summary.model_ids.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        println!(
            "  Modes:   {}",
            summary
                .modes
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if let Some((start, end)) = summary.timestamp_range {
            println!(
                "  Span:    {} .. {}",
                start.format("%Y-%m-%d %H:%M:%S"),
                end.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    println!("{}", "─".repeat(60));
    println!(
        "{} runs, {} models",
        index.runs.len(),
        models_in(&index).len()
    );
    Ok(())
}

fn cmd_modes() -> Result<()> {
    let config = load_config()?;
    let registry = ModeRegistry::standard();

    println!("Query Modes");
    println!("{}", "─".repeat(60));
    for mode in registry.iter() {
        println!("{}", mode);
        println!(
            "  Expected: {}-{} ms   {}",
            mode.expected_response_ms.0, mode.expected_response_ms.1, mode.description
        );
    }
    println!();

    let store = open_store(&config)?;
    let results = store
        .query(&BenchmarkFilter::new())
        .context("Failed to read benchmark results")?;
    if results.is_empty() {
        println!("No benchmark data recorded yet.");
        return Ok(());
    }

    let mut summaries = BTreeMap::new();
    for mode in registry.names() {
        let of_mode = results.iter().filter(|r| r.mode_name == mode);
        let timings: Vec<f64> = of_mode.clone().filter_map(|r| r.metric(DEFAULT_METRIC)).collect();
        let accuracy: Vec<f64> = of_mode.filter_map(|r| r.metric("faithfulness")).collect();
        if timings.is_empty() && accuracy.is_empty() {
            continue;
        }
        summaries.insert(
            mode,
            ModeSummary {
                avg_response_ms: MetricAggregate::from_values(&timings).map(|a| a.mean),
                accuracy: MetricAggregate::from_values(&accuracy).map(|a| a.mean),
            },
        );
    }
    println!("{}", mode_comparison_table(&registry, &summaries));
    Ok(())
}

async fn cmd_score(
    question: String,
    answer: String,
    contexts: Vec<String>,
    fallback_only: bool,
    record: Option<String>,
    mode: ModeName,
    model: Option<String>,
) -> Result<()> {
    let config = load_config()?;
    let scorer = if fallback_only {
        AnswerScorer::fallback_only(config.scoring.clone())
    } else {
        AnswerScorer::from_config(&config).context("Failed to create scorer")?
    };

    let start = Instant::now();
    let score = scorer
        .score(&question, &answer, &contexts)
        .await
        .context("Scoring failed")?;
    let elapsed = start.elapsed();

    println!("Scores ({} method, {:.2?})", score.method, elapsed);
    println!("{}", "─".repeat(40));
    println!("  Faithfulness:      {:.3}", score.faithfulness);
    println!("  Answer relevancy:  {:.3}", score.relevancy);
    println!("  Context precision: {:.3}", score.context_precision);
    println!("  Mean:              {:.3}", score.mean());

    if let Some(test_name) = record {
        let store = open_store(&config)?;
        let model_id = model.unwrap_or_else(|| config.default_model.clone());
        let recorder = store.recorder(model_id);
        let metadata = ResultMetadata {
            scoring_method: Some(score.method),
            query: Some(question),
            sources: Some(contexts.len()),
            ..ResultMetadata::default()
        };
        recorder
            .record(&test_name, mode, score.as_metrics(), metadata)
            .context("Failed to record scores")?;
        println!();
        println!(
            "Recorded as '{}' in run {} ({})",
            test_name,
            recorder.run_id(),
            recorder.model_id()
        );
    }

    Ok(())
}

fn cmd_review(path: PathBuf) -> Result<()> {
    let export = ValidationExport::load(&path)
        .with_context(|| format!("Failed to load validation export '{}'", path.display()))?;
    let summary = summarize(&export);
    let patterns = analyze(&summary);

    println!("Validation Results Summary");
    println!("{}", "─".repeat(60));
    println!("  Report ID:  {}", summary.report_id);
    println!("  Generated:  {}", summary.generated_at.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "  Judged:     {}/{} ({:.1}%)",
        summary.judged_items, summary.total_items, summary.validation_rate
    );
    println!("  Pending:    {}", summary.not_judged);
    println!();
    println!("  Accurate:   {}", summary.counts.accurate);
    println!("  Partial:    {}", summary.counts.partial);
    println!("  Inaccurate: {}", summary.counts.inaccurate);

    if !summary.by_kind.is_empty() {
        println!();
        println!("By item kind:");
        for (kind, counts) in &summary.by_kind {
            println!(
                "  {:<16} total {:>3}, accurate {:>3} ({:.1}%), partial {:>3}, inaccurate {:>3}",
                kind.to_string(),
                counts.total,
                counts.accurate,
                counts.accuracy_pct(),
                counts.partial,
                counts.inaccurate
            );
        }
    }

    if !summary.feedback.is_empty() {
        println!();
        println!("Feedback ({} items with notes):", summary.feedback.len());
        for fb in &summary.feedback {
            let notes: String = fb.notes.chars().take(200).collect();
            let more = if fb.notes.chars().count() > 200 { "..." } else { "" };
            println!("  #{} ({}, {}): {}{}", fb.item_id, fb.item_kind, fb.verdict, notes, more);
        }
    }

    println!();
    println!("Quality patterns:");
    println!("  Accuracy rate:      {:.1}%", patterns.accuracy_rate);
    println!("  Partial rate:       {:.1}%", patterns.partial_rate);
    println!("  Hallucination rate: {:.1}%", patterns.hallucination_rate);
    for issue in &patterns.issues {
        println!("  Issue [{}] #{}: {}", issue.category, issue.item_id, issue.excerpt);
    }
    for strength in &patterns.strengths {
        println!("  Strength: {}", strength);
    }

    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = config.validate_llm() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm).context("Failed to create LLM client")?;

    println!("Probing health endpoint {}...", client.health_endpoint());
    if client.health().await {
        println!("Health check passed.");
    } else {
        println!("Health check failed; scoring will use the lexical fallback.");
    }

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => {
            println!("Connection successful!");
        }
        Err(e) => {
            println!("Connection failed: {}", e);
        }
    }

    Ok(())
}
