//! Configuration for the evaluation engine.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Judge model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the OpenAI-compatible API (e.g., "http://127.0.0.1:9000")
    pub api_base: String,

    /// API key for authentication. Local model servers usually need none.
    #[serde(default)]
    pub api_key: String,

    /// Model name used as the judge (e.g., "qwen3-4b-q4-k-m")
    pub model: String,

    /// Maximum tokens for response (optional)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation (optional)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound for one scoring attempt, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Path probed before each scoring attempt.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Timeout for the health probe, in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.0
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "qwen3-4b-q4-k-m".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            health_path: default_health_path(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Tunable constants for the lexical fallback scorer.
///
/// The ratios are heuristics calibrated against a handful of hand-checked
/// answers, not derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    /// Words ignored when extracting question keywords and answer content.
    pub stop_words: Vec<String>,
    /// Added to the raw keyword overlap when computing relevancy.
    pub relevancy_base: f64,
    /// Score used when the question has no content words to match.
    pub neutral_score: f64,
    /// Weight of the keyword-hit fraction in context precision.
    pub precision_keyword_weight: f64,
    /// Weight of the diversity term in context precision.
    pub precision_diversity_weight: f64,
    /// Mean context length (tokens) at which the length factor saturates.
    pub min_informative_tokens: usize,
}

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "has", "have",
    "how", "in", "is", "it", "its", "many", "much", "of", "on", "or", "that", "the", "there",
    "these", "this", "those", "to", "was", "were", "what", "when", "where", "which", "who", "why",
    "with",
];

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            relevancy_base: 0.0,
            neutral_score: 0.5,
            precision_keyword_weight: 0.7,
            precision_diversity_weight: 0.3,
            min_informative_tokens: 8,
        }
    }
}

/// Where benchmark runs and validation sessions live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per benchmark run plus `index.json`.
    pub benchmark_dir: PathBuf,
    /// Directory for session snapshots and validation exports.
    pub validation_dir: PathBuf,
    /// Seconds between validation session auto-saves.
    pub auto_save_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            benchmark_dir: PathBuf::from("reports/benchmarks"),
            validation_dir: PathBuf::from("reports/validation"),
            auto_save_secs: 30,
        }
    }
}

impl StorageConfig {
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_secs)
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Judge model settings
    pub llm: LlmConfig,
    /// Fallback scoring constants
    pub scoring: LexicalConfig,
    /// On-disk locations
    pub storage: StorageConfig,
    /// Model id recorded on benchmark results when the caller gives none.
    pub default_model: String,
}

impl Default for Config {
    fn default() -> Self {
        let llm = LlmConfig::default();
        Self {
            default_model: llm.model.clone(),
            llm,
            scoring: LexicalConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    scoring: Option<LexicalConfig>,
    storage: Option<StorageConfig>,
    default_model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    health_path: Option<String>,
    probe_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_*, RAG_EVAL_*)
    /// 2. Config file (~/.config/rag-eval-tracker/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(tokens) = parse_env("LLM_MAX_TOKENS") {
            self.llm.max_tokens = tokens;
        }

        if let Some(temp) = parse_env("LLM_TEMPERATURE") {
            self.llm.temperature = temp;
        }

        if let Some(secs) = parse_env("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = secs;
        }

        if let Ok(dir) = env::var("RAG_EVAL_BENCHMARK_DIR") {
            self.storage.benchmark_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var("RAG_EVAL_VALIDATION_DIR") {
            self.storage.validation_dir = PathBuf::from(dir);
        }

        if let Some(secs) = parse_env("RAG_EVAL_AUTO_SAVE_SECS") {
            self.storage.auto_save_secs = secs;
        }

        if let Ok(model) = env::var("RAG_EVAL_DEFAULT_MODEL") {
            self.default_model = model;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;

        let file_config: ConfigFile = serde_yaml::from_str(&content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.default_model = model.clone();
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                config.llm.timeout_secs = timeout_secs;
            }
            if let Some(health_path) = llm.health_path {
                config.llm.health_path = health_path;
            }
            if let Some(probe) = llm.probe_timeout_secs {
                config.llm.probe_timeout_secs = probe;
            }
        }

        if let Some(scoring) = file_config.scoring {
            config.scoring = scoring;
        }
        if let Some(storage) = file_config.storage {
            config.storage = storage;
        }
        if let Some(model) = file_config.default_model {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rag-eval-tracker")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate ranges that apply whether or not a judge is configured.
    pub fn validate(&self) -> Result<()> {
        if self.storage.auto_save_secs == 0 {
            return Err(EvalError::Config(
                "Auto-save interval must be at least one second.".to_string(),
            ));
        }

        if self.llm.timeout_secs == 0 {
            return Err(EvalError::Config(
                "LLM timeout must be at least one second. Scoring never waits unbounded."
                    .to_string(),
            ));
        }

        let s = &self.scoring;
        for (name, value) in [
            ("relevancy_base", s.relevancy_base),
            ("neutral_score", s.neutral_score),
            ("precision_keyword_weight", s.precision_keyword_weight),
            ("precision_diversity_weight", s.precision_diversity_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EvalError::Config(format!(
                    "scoring.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if s.precision_keyword_weight + s.precision_diversity_weight > 1.0 + f64::EPSILON {
            return Err(EvalError::Config(
                "scoring precision weights must sum to at most 1".to_string(),
            ));
        }

        if s.min_informative_tokens == 0 {
            return Err(EvalError::Config(
                "scoring.min_informative_tokens must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate that the judge endpoint is configured.
    pub fn validate_llm(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(EvalError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(EvalError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                model: model.clone(),
                ..Default::default()
            },
            default_model: model,
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
