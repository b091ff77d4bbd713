//! Query modes: the feature combinations every benchmark run iterates over.
//!
//! The registry is built once at startup and passed to the components that
//! need it. Nothing reads it through a global.

use crate::error::{EvalError, Result};
use crate::rag::{ModeFlags, RagResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of a query mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeName {
    Basic,
    Assistant,
    Deep,
    Both,
}

impl ModeName {
    pub const ALL: [ModeName; 4] = [
        ModeName::Basic,
        ModeName::Assistant,
        ModeName::Deep,
        ModeName::Both,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeName::Basic => "basic",
            ModeName::Assistant => "assistant",
            ModeName::Deep => "deep",
            ModeName::Both => "both",
        }
    }
}

impl fmt::Display for ModeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeName {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(ModeName::Basic),
            "assistant" => Ok(ModeName::Assistant),
            "deep" | "deep_search" | "deep-search" => Ok(ModeName::Deep),
            "both" => Ok(ModeName::Both),
            _ => Err(EvalError::UnknownMode(s.to_string())),
        }
    }
}

/// Configuration for a specific query mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub name: ModeName,
    /// Human-facing label ("Deep Search").
    pub label: String,
    pub assistant_mode: bool,
    pub deep_search_mode: bool,
    /// Inclusive (min, max) response time the mode is expected to land in.
    pub expected_response_ms: (u64, u64),
    pub description: String,
}

impl ModeConfig {
    fn new(
        name: ModeName,
        label: &str,
        assistant_mode: bool,
        deep_search_mode: bool,
        expected_response_ms: (u64, u64),
        description: &str,
    ) -> Self {
        Self {
            name,
            label: label.to_string(),
            assistant_mode,
            deep_search_mode,
            expected_response_ms,
            description: description.to_string(),
        }
    }

    /// Flags sent to the RAG service for this mode.
    pub fn api_params(&self) -> ModeFlags {
        ModeFlags {
            assistant_mode: self.assistant_mode,
            deep_search_mode: self.deep_search_mode,
        }
    }

    /// Active features, for display.
    pub fn features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if self.assistant_mode {
            features.push("Assistant");
        }
        if self.deep_search_mode {
            features.push("Deep Search");
        }
        if features.is_empty() {
            features.push("None");
        }
        features
    }
}

impl fmt::Display for ModeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Assistant={}, Deep={})",
            self.label, self.assistant_mode, self.deep_search_mode
        )
    }
}

/// The fixed set of modes, in iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeRegistry {
    modes: Vec<ModeConfig>,
}

impl ModeRegistry {
    /// The four standard modes.
    pub fn standard() -> Self {
        Self {
            modes: vec![
                ModeConfig::new(
                    ModeName::Basic,
                    "Basic",
                    false,
                    false,
                    (1000, 3000),
                    "Fastest responses, no advanced features",
                ),
                ModeConfig::new(
                    ModeName::Assistant,
                    "Assistant",
                    true,
                    false,
                    (2000, 5000),
                    "Smart features: confidence scoring, clarification, constraints",
                ),
                ModeConfig::new(
                    ModeName::Deep,
                    "Deep Search",
                    false,
                    true,
                    (5000, 15000),
                    "Thorough analysis: compound queries, validation, map-reduce",
                ),
                ModeConfig::new(
                    ModeName::Both,
                    "Both",
                    true,
                    true,
                    (5000, 20000),
                    "All features enabled for maximum accuracy",
                ),
            ],
        }
    }

    /// Build a registry from explicit modes. Names must be unique.
    pub fn from_modes(modes: Vec<ModeConfig>) -> Result<Self> {
        for (i, mode) in modes.iter().enumerate() {
            if modes[..i].iter().any(|m| m.name == mode.name) {
                return Err(EvalError::Config(format!(
                    "mode '{}' registered twice",
                    mode.name
                )));
            }
        }
        Ok(Self { modes })
    }

    /// Look up a registered mode.
    pub fn get(&self, name: ModeName) -> Result<&ModeConfig> {
        self.modes
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| EvalError::UnknownMode(name.to_string()))
    }

    /// Look up a mode by its textual name.
    pub fn lookup(&self, name: &str) -> Result<&ModeConfig> {
        self.get(name.parse()?)
    }

    pub fn contains(&self, name: ModeName) -> bool {
        self.modes.iter().any(|m| m.name == name)
    }

    pub fn names(&self) -> Vec<ModeName> {
        self.modes.iter().map(|m| m.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModeConfig> {
        self.modes.iter()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Assistant-mode features observed in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantFeatures {
    /// Confidence block present exactly when the mode enables it.
    pub confidence_present: bool,
    /// Hallucination check present exactly when the mode enables it.
    pub hallucination_check_present: bool,
}

/// Deep-search features observed in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepSearchFeatures {
    pub validation_present: bool,
    pub compound_handling_available: bool,
    pub mapreduce_available: bool,
}

/// Outcome of checking one response against its mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeCheck {
    pub mode: ModeName,
    pub response_time_ms: u64,
    pub response_time_valid: bool,
    pub assistant: Option<AssistantFeatures>,
    pub deep_search: Option<DeepSearchFeatures>,
}

impl ModeCheck {
    /// Flatten into benchmark metrics (flags become 0.0 / 1.0).
    pub fn as_metrics(&self) -> BTreeMap<String, f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let mut metrics = BTreeMap::new();
        metrics.insert("response_time_ms".to_string(), self.response_time_ms as f64);
        metrics.insert(
            "response_time_valid".to_string(),
            flag(self.response_time_valid),
        );
        if let Some(a) = &self.assistant {
            metrics.insert("confidence_present".to_string(), flag(a.confidence_present));
            metrics.insert(
                "hallucination_check_present".to_string(),
                flag(a.hallucination_check_present),
            );
        }
        if let Some(d) = &self.deep_search {
            metrics.insert("validation_present".to_string(), flag(d.validation_present));
            metrics.insert(
                "compound_handling_available".to_string(),
                flag(d.compound_handling_available),
            );
            metrics.insert("mapreduce_available".to_string(), flag(d.mapreduce_available));
        }
        metrics
    }
}

/// Checks responses against what their mode should produce.
pub struct ModeValidator<'a> {
    mode: &'a ModeConfig,
}

impl<'a> ModeValidator<'a> {
    pub fn new(mode: &'a ModeConfig) -> Self {
        Self { mode }
    }

    /// Whether the response time falls inside the mode's expected range.
    pub fn response_time_valid(&self, response_time_ms: u64) -> bool {
        let (min, max) = self.mode.expected_response_ms;
        (min..=max).contains(&response_time_ms)
    }

    pub fn assistant_features(&self, response: &RagResponse) -> AssistantFeatures {
        AssistantFeatures {
            confidence_present: response.confidence.is_some() == self.mode.assistant_mode,
            hallucination_check_present: response.hallucination_check.is_some()
                == self.mode.assistant_mode,
        }
    }

    pub fn deep_search_features(&self, response: &RagResponse) -> DeepSearchFeatures {
        DeepSearchFeatures {
            validation_present: response.validation.is_some(),
            compound_handling_available: response.metadata.compound_query.is_some(),
            mapreduce_available: response.metadata.map_reduce.is_some()
                || response.metadata.strategy.is_some(),
        }
    }

    /// Full check; feature blocks are only reported for enabled features.
    pub fn check(&self, response: &RagResponse) -> ModeCheck {
        ModeCheck {
            mode: self.mode.name,
            response_time_ms: response.timing_ms,
            response_time_valid: self.response_time_valid(response.timing_ms),
            assistant: self
                .mode
                .assistant_mode
                .then(|| self.assistant_features(response)),
            deep_search: self
                .mode
                .deep_search_mode
                .then(|| self.deep_search_features(response)),
        }
    }
}

/// Per-mode figures for [`mode_comparison_table`].
#[derive(Debug, Clone, Default)]
pub struct ModeSummary {
    pub avg_response_ms: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Render a markdown table comparing modes, in registry order.
pub fn mode_comparison_table(
    registry: &ModeRegistry,
    results: &BTreeMap<ModeName, ModeSummary>,
) -> String {
    let mut lines = vec![
        "| Mode | Avg Time (ms) | Accuracy | Features Active |".to_string(),
        "|------|---------------|----------|-----------------|".to_string(),
    ];

    for mode in registry.iter() {
        let Some(summary) = results.get(&mode.name) else {
            continue;
        };
        let avg = summary
            .avg_response_ms
            .map(|v| format!("{:.0}", v))
            .unwrap_or_else(|| "N/A".to_string());
        let accuracy = summary
            .accuracy
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "N/A".to_string());
        lines.push(format!(
            "| {} | {} | {} | {} |",
            mode.label,
            avg,
            accuracy,
            mode.features().join(", ")
        ));
    }

    lines.join("\n")
}
