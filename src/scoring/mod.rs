//! Answer-quality scoring.
//!
//! Two scorers share the [`Scorer`] interface: [`LlmScorer`] asks a judge
//! model, [`LexicalScorer`] computes token-overlap heuristics. The
//! [`AnswerScorer`] gate picks one of them per call, so every
//! [`ScoreResult`] comes entirely from a single method.

pub mod lexical;
pub mod llm;

pub use lexical::{LexicalScorer, tokenize};
pub use llm::{Judge, LlmScorer};

use crate::config::{Config, LexicalConfig};
use crate::error::{EvalError, Result};
use crate::llm::LlmClient;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Which scorer produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    Llm,
    Fallback,
}

impl std::fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringMethod::Llm => f.write_str("llm"),
            ScoringMethod::Fallback => f.write_str("fallback"),
        }
    }
}

/// Quality scores for one (question, answer, contexts) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub faithfulness: f64,
    pub relevancy: f64,
    pub context_precision: f64,
    pub method: ScoringMethod,
}

impl ScoreResult {
    pub(crate) fn new(
        method: ScoringMethod,
        faithfulness: f64,
        relevancy: f64,
        context_precision: f64,
    ) -> Self {
        Self {
            faithfulness: faithfulness.clamp(0.0, 1.0),
            relevancy: relevancy.clamp(0.0, 1.0),
            context_precision: context_precision.clamp(0.0, 1.0),
            method,
        }
    }

    /// Unweighted mean of the three metrics.
    pub fn mean(&self) -> f64 {
        (self.faithfulness + self.relevancy + self.context_precision) / 3.0
    }

    /// Metric map suitable for a benchmark result.
    pub fn as_metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("faithfulness".to_string(), self.faithfulness),
            ("relevancy".to_string(), self.relevancy),
            ("context_precision".to_string(), self.context_precision),
        ])
    }
}

/// One scoring capability, two implementations.
#[allow(async_fn_in_trait)]
pub trait Scorer {
    fn method(&self) -> ScoringMethod;

    async fn score(&self, question: &str, answer: &str, contexts: &[String]) -> Result<ScoreResult>;
}

/// A triple to score in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// Scores answers through the judge when it is healthy, lexically otherwise.
pub struct AnswerScorer<J = LlmClient> {
    llm: Option<LlmScorer<J>>,
    fallback: LexicalScorer,
    timeout: Duration,
}

impl AnswerScorer<LlmClient> {
    /// Build from configuration. Without a judge endpoint every call uses the
    /// lexical scorer.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.llm.api_base.is_empty() {
            return Ok(Self::fallback_only(config.scoring.clone()));
        }
        let client = LlmClient::new(config.llm.clone())?;
        Ok(AnswerScorer::new(
            client,
            config.scoring.clone(),
            config.llm.timeout(),
        ))
    }

    /// Scorer that never contacts a judge.
    pub fn fallback_only(lexical: LexicalConfig) -> Self {
        Self {
            llm: None,
            fallback: LexicalScorer::new(lexical),
            timeout: Duration::ZERO,
        }
    }
}

impl<J: Judge> AnswerScorer<J> {
    /// `timeout` bounds the whole judge path for one call.
    pub fn new(judge: J, lexical: LexicalConfig, timeout: Duration) -> Self {
        Self {
            llm: Some(LlmScorer::new(judge)),
            fallback: LexicalScorer::new(lexical),
            timeout,
        }
    }

    pub fn lexical(&self) -> &LexicalScorer {
        &self.fallback
    }

    /// Score an answer.
    ///
    /// Only an empty answer is an error. Judge failures of any kind
    /// (unreachable, timeout, unparsable or non-numeric verdicts) are
    /// absorbed and the lexical scores are returned instead.
    pub async fn score(
        &self,
        question: &str,
        answer: &str,
        contexts: &[String],
    ) -> Result<ScoreResult> {
        if answer.trim().is_empty() {
            return Err(EvalError::EmptyAnswer);
        }

        match self.score_with_judge(question, answer, contexts).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if self.llm.is_some() {
                    warn!(error = %e, "judge scoring failed, using lexical fallback");
                }
                self.fallback.score(question, answer, contexts).await
            }
        }
    }

    async fn score_with_judge(
        &self,
        question: &str,
        answer: &str,
        contexts: &[String],
    ) -> Result<ScoreResult> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| EvalError::ScorerUnavailable("no judge configured".to_string()))?;

        if !llm.judge().is_available().await {
            return Err(EvalError::ScorerUnavailable(
                "judge failed health check".to_string(),
            ));
        }

        // No retry on timeout.
        match tokio::time::timeout(self.timeout, llm.score(question, answer, contexts)).await {
            Ok(result) => result,
            Err(_) => Err(EvalError::ScorerUnavailable(format!(
                "judge timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Score many cases, returning results in input order.
    ///
    /// `concurrency` is the number of cases scored at once. Keep it at 1
    /// unless the judge host has memory to spare.
    pub async fn score_batch(
        &self,
        cases: &[EvalCase],
        concurrency: usize,
    ) -> Result<Vec<ScoreResult>> {
        let concurrency = concurrency.max(1);
        debug!(cases = cases.len(), concurrency, "scoring batch");
        futures::stream::iter(cases)
            .map(|case| self.score(&case.question, &case.answer, &case.contexts))
            .buffered(concurrency)
            .try_collect()
            .await
    }
}
