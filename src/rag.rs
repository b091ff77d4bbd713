//! Request/response contract of the external RAG service.
//!
//! The engine never calls the service itself. Test drivers do, and hand the
//! decoded responses to the scorer, the benchmark store and validation
//! sessions.

use serde::{Deserialize, Serialize};

/// Feature toggles sent with every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlags {
    pub assistant_mode: bool,
    pub deep_search_mode: bool,
}

/// Query sent to the RAG service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRequest {
    pub question: String,
    #[serde(flatten)]
    pub flags: ModeFlags,
}

/// A retrieved passage returned alongside the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePassage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Confidence block produced in assistant mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f64,
    #[serde(default)]
    pub verdict: String,
}

/// Hallucination check produced in assistant mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HallucinationCheck {
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub is_hallucination: bool,
}

/// Answer validation produced in deep search mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerValidation {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Strategy hints the service reports about how a query was executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound_query: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_reduce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Response returned by the RAG service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourcePassage>,
    pub timing_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hallucination_check: Option<HallucinationCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<AnswerValidation>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl RagResponse {
    /// Passage texts in retrieval order, as the scorer expects them.
    pub fn contexts(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.text.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flattens_flags() {
        let request = RagRequest {
            question: "How many rows?".to_string(),
            flags: ModeFlags {
                assistant_mode: true,
                deep_search_mode: false,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["assistant_mode"], true);
        assert_eq!(json["deep_search_mode"], false);
        assert_eq!(json["question"], "How many rows?");
    }

    #[test]
    fn test_minimal_response_parses() {
        let json = r#"{
            "answer": "There are 1000 rows.",
            "sources": [{"text": "The dataset contains 1000 rows."}],
            "timing_ms": 1834
        }"#;
        let response: RagResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.contexts(), vec!["The dataset contains 1000 rows."]);
        assert!(response.confidence.is_none());
        assert!(response.metadata.strategy.is_none());
    }
}
