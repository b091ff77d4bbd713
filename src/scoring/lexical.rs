//! Deterministic lexical scorer used when the judge model is unavailable.
//!
//! Scores are token-overlap heuristics. They are comparable with each other
//! but not with judge-produced scores, which is why every result records
//! its method.

use super::{ScoreResult, Scorer, ScoringMethod};
use crate::config::LexicalConfig;
use crate::error::Result;
use std::collections::BTreeSet;

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token-overlap scorer.
#[derive(Debug, Clone)]
pub struct LexicalScorer {
    config: LexicalConfig,
    stop_words: BTreeSet<String>,
}

impl LexicalScorer {
    pub fn new(config: LexicalConfig) -> Self {
        let stop_words = config.stop_words.iter().map(|w| w.to_lowercase()).collect();
        Self { config, stop_words }
    }

    /// Tokens of `text` that are not stop words.
    fn content_words(&self, text: &str) -> BTreeSet<String> {
        tokenize(text)
            .into_iter()
            .filter(|t| !self.stop_words.contains(t))
            .collect()
    }

    /// Share of the answer's content words that also appear in the contexts.
    pub fn faithfulness(&self, answer: &str, contexts: &[String]) -> f64 {
        let context_tokens: BTreeSet<String> =
            contexts.iter().flat_map(|c| tokenize(c)).collect();
        if context_tokens.is_empty() {
            return 0.0;
        }

        let mut answer_words = self.content_words(answer);
        if answer_words.is_empty() {
            // Answers made only of stop words still get a ratio.
            answer_words = tokenize(answer).into_iter().collect();
        }
        if answer_words.is_empty() {
            return 0.0;
        }

        let grounded = answer_words.intersection(&context_tokens).count();
        clamp01(grounded as f64 / answer_words.len() as f64)
    }

    /// Share of the question's keywords echoed by the answer.
    pub fn relevancy(&self, question: &str, answer: &str) -> f64 {
        let keywords = self.content_words(question);
        if keywords.is_empty() {
            return clamp01(self.config.neutral_score);
        }

        let answer_tokens: BTreeSet<String> = tokenize(answer).into_iter().collect();
        let overlap = keywords.intersection(&answer_tokens).count();
        clamp01(self.config.relevancy_base + overlap as f64 / keywords.len() as f64)
    }

    /// Keyword hits per context blended with a diversity/length term.
    pub fn context_precision(&self, question: &str, contexts: &[String]) -> f64 {
        if contexts.is_empty() {
            return 0.0;
        }

        let keywords = self.content_words(question);
        let tokenized: Vec<Vec<String>> = contexts.iter().map(|c| tokenize(c)).collect();

        let keyword_hit = if keywords.is_empty() {
            self.config.neutral_score
        } else {
            let hits = tokenized
                .iter()
                .filter(|tokens| tokens.iter().any(|t| keywords.contains(t)))
                .count();
            hits as f64 / contexts.len() as f64
        };

        let total: usize = tokenized.iter().map(Vec::len).sum();
        let (diversity, length_factor) = if total == 0 {
            (0.0, 0.0)
        } else {
            let distinct: BTreeSet<&String> = tokenized.iter().flatten().collect();
            let mean_len = total as f64 / contexts.len() as f64;
            (
                distinct.len() as f64 / total as f64,
                (mean_len / self.config.min_informative_tokens as f64).min(1.0),
            )
        };

        clamp01(
            self.config.precision_keyword_weight * keyword_hit
                + self.config.precision_diversity_weight * diversity * length_factor,
        )
    }

    /// Compute all three metrics.
    pub fn evaluate(&self, question: &str, answer: &str, contexts: &[String]) -> ScoreResult {
        ScoreResult::new(
            ScoringMethod::Fallback,
            self.faithfulness(answer, contexts),
            self.relevancy(question, answer),
            self.context_precision(question, contexts),
        )
    }
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self::new(LexicalConfig::default())
    }
}

impl Scorer for LexicalScorer {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Fallback
    }

    async fn score(&self, question: &str, answer: &str, contexts: &[String]) -> Result<ScoreResult> {
        Ok(self.evaluate(question, answer, contexts))
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("How many rows? There are 1,000."),
            vec!["how", "many", "rows", "there", "are", "1", "000"]
        );
        assert!(tokenize("  ?! ").is_empty());
    }

    #[test]
    fn test_relevant_answer_scores_high() {
        let scorer = LexicalScorer::default();
        let contexts = ctx(&["The dataset contains 1000 rows across 5 regions."]);
        let result = scorer.evaluate("How many rows?", "There are 1000 rows.", &contexts);

        assert_eq!(result.method, ScoringMethod::Fallback);
        assert!(result.faithfulness > 0.3, "faithfulness {}", result.faithfulness);
        assert!(result.relevancy > 0.3, "relevancy {}", result.relevancy);
    }

    #[test]
    fn test_irrelevant_answer_scores_low() {
        let scorer = LexicalScorer::default();
        let contexts = ctx(&["The dataset contains 1000 rows across 5 regions."]);
        let result = scorer.evaluate(
            "How many rows?",
            "The capital of France is Paris.",
            &contexts,
        );

        assert!(result.faithfulness < 0.2, "faithfulness {}", result.faithfulness);
        assert!(result.relevancy < 0.2, "relevancy {}", result.relevancy);
    }

    #[test]
    fn test_deterministic() {
        let scorer = LexicalScorer::default();
        let contexts = ctx(&["Revenue grew 12% in Q3.", "Costs were flat."]);
        let a = scorer.evaluate("How did revenue change?", "Revenue grew 12%.", &contexts);
        let b = scorer.evaluate("How did revenue change?", "Revenue grew 12%.", &contexts);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_contexts() {
        let scorer = LexicalScorer::default();
        let result = scorer.evaluate("How many rows?", "There are 1000 rows.", &[]);
        assert_eq!(result.faithfulness, 0.0);
        assert_eq!(result.context_precision, 0.0);
        assert_eq!(result.relevancy, 1.0);
    }

    #[test]
    fn test_question_without_keywords_is_neutral() {
        let scorer = LexicalScorer::default();
        assert_eq!(scorer.relevancy("What is this?", "A table."), 0.5);
    }

    #[test]
    fn test_context_precision_prefers_matching_chunks() {
        let scorer = LexicalScorer::default();
        let matching = ctx(&["Sales by region for 2023 with totals per quarter and month."]);
        let unrelated = ctx(&["Employee onboarding checklist covering laptops and badges."]);

        let good = scorer.context_precision("What were sales by region?", &matching);
        let bad = scorer.context_precision("What were sales by region?", &unrelated);
        assert!(good > bad);
        assert!((0.0..=1.0).contains(&good));
        assert!((0.0..=1.0).contains(&bad));
    }

    #[test]
    fn test_repetitive_context_loses_diversity() {
        let scorer = LexicalScorer::default();
        let repetitive = ctx(&["rows rows rows rows rows rows rows rows"]);
        let varied = ctx(&["rows grouped by region month product channel and owner"]);
        assert!(
            scorer.context_precision("How many rows?", &varied)
                > scorer.context_precision("How many rows?", &repetitive)
        );
    }

    #[test]
    fn test_relevancy_base_is_tunable() {
        let config = LexicalConfig {
            relevancy_base: 0.3,
            ..LexicalConfig::default()
        };
        let scorer = LexicalScorer::new(config);
        let score = scorer.relevancy("How many rows?", "Paris is in France.");
        assert!((score - 0.3).abs() < 1e-9);
    }
}
