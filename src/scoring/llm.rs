//! LLM-assisted scoring: faithfulness, answer relevancy and context
//! precision computed from judge verdicts.

use super::{ScoreResult, Scorer, ScoringMethod};
use crate::error::{EvalError, Result};
use crate::llm::{LlmClient, Prompts};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A model that can act as the scoring judge.
#[allow(async_fn_in_trait)]
pub trait Judge {
    /// Cheap connectivity probe. Must not block longer than a few seconds.
    async fn is_available(&self) -> bool;

    /// Send one prompt and return the raw reply text.
    async fn ask(&self, system: &str, prompt: &str) -> Result<String>;
}

impl Judge for LlmClient {
    async fn is_available(&self) -> bool {
        self.health().await
    }

    async fn ask(&self, system: &str, prompt: &str) -> Result<String> {
        self.complete(Some(system), prompt).await
    }
}

#[derive(Debug, Deserialize)]
struct ClaimVerdict {
    supported: bool,
}

#[derive(Debug, Deserialize)]
struct FaithfulnessReply {
    #[serde(default)]
    claims: Vec<ClaimVerdict>,
}

#[derive(Debug, Deserialize)]
struct RelevancyReply {
    relevancy: f64,
    #[serde(default)]
    noncommittal: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkVerdict {
    useful: bool,
}

#[derive(Debug, Deserialize)]
struct PrecisionReply {
    #[serde(default)]
    verdicts: Vec<ChunkVerdict>,
}

/// Scores through a judge model. Any unusable verdict fails the whole call.
pub struct LlmScorer<J> {
    judge: J,
}

impl<J: Judge> LlmScorer<J> {
    pub fn new(judge: J) -> Self {
        Self { judge }
    }

    pub fn judge(&self) -> &J {
        &self.judge
    }

    async fn ask_json<T: DeserializeOwned>(&self, metric: &str, prompt: &str) -> Result<T> {
        let reply = self.judge.ask(Prompts::judge_system(), prompt).await?;
        let json_str = extract_json(&reply);
        serde_json::from_str(&json_str).map_err(|e| {
            EvalError::LlmParse(format!(
                "Failed to parse {} verdict: {}. Response: {}",
                metric, e, reply
            ))
        })
    }

    async fn faithfulness(&self, answer: &str, contexts: &str) -> Result<f64> {
        let prompt = Prompts::faithfulness()
            .replace("{contexts}", contexts)
            .replace("{answer}", answer);
        let reply: FaithfulnessReply = self.ask_json("faithfulness", &prompt).await?;

        if reply.claims.is_empty() {
            return Err(EvalError::ScorerUnavailable(
                "faithfulness: judge extracted no claims".to_string(),
            ));
        }
        let supported = reply.claims.iter().filter(|c| c.supported).count();
        Ok(supported as f64 / reply.claims.len() as f64)
    }

    async fn relevancy(&self, question: &str, answer: &str) -> Result<f64> {
        let prompt = Prompts::answer_relevancy()
            .replace("{question}", question)
            .replace("{answer}", answer);
        let reply: RelevancyReply = self.ask_json("answer relevancy", &prompt).await?;

        if reply.noncommittal {
            return Ok(0.0);
        }
        Ok(reply.relevancy)
    }

    async fn context_precision(
        &self,
        question: &str,
        answer: &str,
        contexts: &[String],
    ) -> Result<f64> {
        let prompt = Prompts::context_precision()
            .replace("{question}", question)
            .replace("{answer}", answer)
            .replace("{contexts}", &Prompts::numbered_contexts(contexts));
        let reply: PrecisionReply = self.ask_json("context precision", &prompt).await?;

        if reply.verdicts.is_empty() {
            return Err(EvalError::ScorerUnavailable(
                "context precision: judge returned no verdicts".to_string(),
            ));
        }
        let useful: Vec<bool> = reply
            .verdicts
            .iter()
            .take(contexts.len())
            .map(|v| v.useful)
            .collect();
        Ok(average_precision(&useful))
    }
}

impl<J: Judge> Scorer for LlmScorer<J> {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Llm
    }

    /// Calls run one after another so at most one judge request is in flight.
    async fn score(&self, question: &str, answer: &str, contexts: &[String]) -> Result<ScoreResult> {
        let placeholder;
        let contexts = if contexts.is_empty() {
            placeholder = vec!["No context available".to_string()];
            &placeholder[..]
        } else {
            contexts
        };
        let joined = contexts.join("\n\n");

        let faithfulness = ensure_metric("faithfulness", self.faithfulness(answer, &joined).await?)?;
        let relevancy = ensure_metric("answer_relevancy", self.relevancy(question, answer).await?)?;
        let precision = ensure_metric(
            "context_precision",
            self.context_precision(question, answer, contexts).await?,
        )?;

        debug!(faithfulness, relevancy, precision, "judge scores accepted");
        Ok(ScoreResult::new(
            ScoringMethod::Llm,
            faithfulness,
            relevancy,
            precision,
        ))
    }
}

/// Reject NaN, infinities and values outside [0, 1].
fn ensure_metric(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(EvalError::ScorerUnavailable(format!(
            "{} resolved to non-numeric value {}",
            name, value
        )))
    }
}

/// Mean of precision@k over the ranks holding a useful chunk.
fn average_precision(useful: &[bool]) -> f64 {
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (k, is_useful) in useful.iter().enumerate() {
        if *is_useful {
            hits += 1;
            sum += hits as f64 / (k + 1) as f64;
        }
    }
    if hits == 0 { 0.0 } else { sum / hits as f64 }
}

/// Extract JSON from response.
fn extract_json(response: &str) -> String {
    let response = response.trim();

    if response.starts_with("```json") {
        if let Some(end) = response.rfind("```") {
            let start = "```json".len();
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if response.starts_with("```") {
        if let Some(end) = response.rfind("```") {
            let start = response.find('\n').map(|n| n + 1).unwrap_or(3);
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}
