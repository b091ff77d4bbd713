//! Summaries of exported validation results.

use super::item::{ItemId, ItemKind, Verdict};
use super::session::ValidationExport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Note keywords that point at a recurring problem.
const ISSUE_KEYWORDS: [(&str, &[&str]); 4] = [
    ("hallucination", &["hallucinated", "fabricated", "made up", "not in context"]),
    ("incomplete", &["missing", "incomplete", "partial", "could be better"]),
    ("context_quality", &["context", "retrieval", "chunks", "sources"]),
    ("formatting", &["format", "structure", "presentation"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub total: usize,
    pub accurate: usize,
    pub partial: usize,
    pub inaccurate: usize,
}

impl KindCounts {
    fn add(&mut self, verdict: Verdict) {
        self.total += 1;
        match verdict {
            Verdict::Accurate => self.accurate += 1,
            Verdict::Partial => self.partial += 1,
            Verdict::Inaccurate => self.inaccurate += 1,
        }
    }

    pub fn accuracy_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.accurate as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub verdict: Verdict,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_items: usize,
    pub judged_items: usize,
    /// Judged share of items, in percent.
    pub validation_rate: f64,
    pub counts: KindCounts,
    pub not_judged: usize,
    pub by_kind: BTreeMap<ItemKind, KindCounts>,
    /// Responses with notes, in item order.
    pub feedback: Vec<Feedback>,
}

pub fn summarize(export: &ValidationExport) -> ReviewSummary {
    let mut counts = KindCounts::default();
    let mut by_kind: BTreeMap<ItemKind, KindCounts> = BTreeMap::new();
    let mut feedback = Vec::new();

    for response in export.responses.values() {
        counts.add(response.verdict);
        by_kind
            .entry(response.item_kind)
            .or_default()
            .add(response.verdict);
        if !response.notes.trim().is_empty() {
            feedback.push(Feedback {
                item_id: response.item_id,
                item_kind: response.item_kind,
                verdict: response.verdict,
                notes: response.notes.clone(),
                timestamp: response.timestamp,
            });
        }
    }

    ReviewSummary {
        report_id: export.report_id.clone(),
        generated_at: export.generated_at,
        total_items: export.total_items,
        judged_items: export.judged_items,
        validation_rate: export.completion_pct(),
        counts,
        not_judged: export.total_items.saturating_sub(export.judged_items),
        by_kind,
        feedback,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub category: &'static str,
    pub item_id: ItemId,
    pub excerpt: String,
}

/// Rates over judged items plus issues spotted in reviewer notes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityPatterns {
    pub hallucination_rate: f64,
    pub partial_rate: f64,
    pub accuracy_rate: f64,
    pub issues: Vec<Issue>,
    pub strengths: Vec<String>,
}

pub fn analyze(summary: &ReviewSummary) -> QualityPatterns {
    let judged = summary.counts.total;
    let rate = |n: usize| {
        if judged == 0 {
            0.0
        } else {
            n as f64 / judged as f64 * 100.0
        }
    };
    let hallucination_rate = rate(summary.counts.inaccurate);
    let partial_rate = rate(summary.counts.partial);
    let accuracy_rate = rate(summary.counts.accurate);

    let mut issues = Vec::new();
    for fb in &summary.feedback {
        let notes = fb.notes.to_lowercase();
        for (category, keywords) in ISSUE_KEYWORDS {
            if keywords.iter().any(|k| notes.contains(k)) {
                issues.push(Issue {
                    category,
                    item_id: fb.item_id,
                    excerpt: fb.notes.chars().take(100).collect(),
                });
            }
        }
    }

    let mut strengths = Vec::new();
    if judged > 0 {
        if accuracy_rate > 70.0 {
            strengths.push("High accuracy rate (>70%)".to_string());
        }
        if summary.counts.inaccurate == 0 {
            strengths.push("No hallucinations detected".to_string());
        } else if hallucination_rate < 10.0 {
            strengths.push("Low hallucination rate (<10%)".to_string());
        }
    }

    QualityPatterns {
        hallucination_rate,
        partial_rate,
        accuracy_rate,
        issues,
        strengths,
    }
}
