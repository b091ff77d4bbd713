//! Items queued for human review and the verdicts recorded against them.

use crate::modes::ModeName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sequential id assigned by the session, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    RagAnswer,
    Chart,
    ModeComparison,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::RagAnswer => "rag_answer",
            ItemKind::Chart => "chart",
            ItemKind::ModeComparison => "mode_comparison",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mode's answer inside a mode comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeAnswer {
    pub answer: String,
    pub response_time_ms: u64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// What the reviewer is asked to judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPayload {
    RagAnswer {
        question: String,
        answer: String,
        #[serde(default)]
        contexts: Vec<String>,
        #[serde(default)]
        metadata: BTreeMap<String, serde_json::Value>,
    },
    Chart {
        prompt: String,
        chart_path: String,
        #[serde(default)]
        metadata: BTreeMap<String, serde_json::Value>,
    },
    ModeComparison {
        query: String,
        query_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_answer: Option<String>,
        modes: BTreeMap<ModeName, ModeAnswer>,
    },
}

impl ItemPayload {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemPayload::RagAnswer { .. } => ItemKind::RagAnswer,
            ItemPayload::Chart { .. } => ItemKind::Chart,
            ItemPayload::ModeComparison { .. } => ItemKind::ModeComparison,
        }
    }

    /// The modes on offer, for mode comparisons.
    pub fn modes(&self) -> Option<&BTreeMap<ModeName, ModeAnswer>> {
        match self {
            ItemPayload::ModeComparison { modes, .. } => Some(modes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationItem {
    pub id: ItemId,
    pub payload: ItemPayload,
    pub added_at: DateTime<Utc>,
}

impl ValidationItem {
    pub fn kind(&self) -> ItemKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accurate,
    Partial,
    Inaccurate,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accurate => "accurate",
            Verdict::Partial => "partial",
            Verdict::Inaccurate => "inaccurate",
        };
        f.write_str(s)
    }
}

/// A reviewer's input for one item, before the session records it.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub verdict: Verdict,
    pub notes: String,
    pub rating: Option<u8>,
    pub best_mode: Option<ModeName>,
}

impl Judgment {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            notes: String::new(),
            rating: None,
            best_mode: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// 1 (poor) to 5 (excellent); checked when the session records it.
    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_best_mode(mut self, mode: ModeName) -> Self {
        self.best_mode = Some(mode);
        self
    }
}

/// A recorded judgment. One per item; later judgments replace earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub verdict: Verdict,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_mode: Option<ModeName>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResponse {
    pub(crate) fn record(item: &ValidationItem, judgment: Judgment) -> Self {
        Self {
            item_id: item.id,
            item_kind: item.kind(),
            verdict: judgment.verdict,
            notes: judgment.notes,
            rating: judgment.rating,
            best_mode: judgment.best_mode,
            timestamp: Utc::now(),
        }
    }
}
