//! Human validation sessions: queue items, record verdicts, auto-save and
//! export.

use super::item::{ItemId, ItemPayload, Judgment, ValidationItem, ValidationResponse};
use crate::error::{EvalError, Result};
use crate::modes::ModeRegistry;
use crate::persistence::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// On-disk form of a session, written by every auto-save.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionSnapshot {
    session_id: String,
    created_at: DateTime<Utc>,
    saved_at: DateTime<Utc>,
    auto_save_ms: u64,
    #[serde(default)]
    exports: u32,
    items: Vec<ValidationItem>,
    responses: BTreeMap<ItemId, ValidationResponse>,
}

/// Immutable bundle handed to reviewers and analysis tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationExport {
    pub report_id: String,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_items: usize,
    #[serde(alias = "validated_items")]
    pub judged_items: usize,
    /// True only when every item has a verdict.
    pub complete: bool,
    #[serde(default)]
    pub items: Vec<ValidationItem>,
    pub responses: BTreeMap<ItemId, ValidationResponse>,
}

/// A snapshot taken under the session lock, written without it.
pub(crate) struct PendingSave {
    path: PathBuf,
    snapshot: SessionSnapshot,
    revision: u64,
    written: Arc<Mutex<Option<u64>>>,
}

impl PendingSave {
    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    /// Write the snapshot unless a newer revision already reached disk.
    pub(crate) fn write(&self) -> Result<PathBuf> {
        let mut written = self.written.lock();
        if written.is_some_and(|w| w > self.revision) {
            return Ok(self.path.clone());
        }
        write_json_atomic(&self.snapshot, &self.path)?;
        *written = Some(self.revision);
        Ok(self.path.clone())
    }
}

impl ValidationExport {
    /// Judged share of items, in percent.
    pub fn completion_pct(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            self.judged_items as f64 / self.total_items as f64 * 100.0
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

pub struct ValidationSession {
    session_id: String,
    dir: PathBuf,
    registry: ModeRegistry,
    auto_save_interval: Duration,
    created_at: DateTime<Utc>,
    items: Vec<ValidationItem>,
    responses: BTreeMap<ItemId, ValidationResponse>,
    exports: u32,
    /// Bumped by every change; a save clears `dirty` only for the revision
    /// it wrote.
    revision: u64,
    dirty: bool,
    last_saved: Instant,
    written: Arc<Mutex<Option<u64>>>,
}

impl ValidationSession {
    /// Start an empty session. Changes are saved once `auto_save_interval`
    /// has passed since the last save, checked on every `add_item` and
    /// `judge`; use [`crate::validation::spawn_auto_save`] to also save
    /// while no calls arrive.
    pub fn new(
        session_id: impl Into<String>,
        dir: impl Into<PathBuf>,
        registry: ModeRegistry,
        auto_save_interval: Duration,
    ) -> Result<Self> {
        let session_id = session_id.into();
        validate_session_id(&session_id)?;
        let dir = dir.into();
        info!(session = %session_id, dir = %dir.display(), "validation session started");
        Ok(Self {
            session_id,
            dir,
            registry,
            auto_save_interval,
            created_at: Utc::now(),
            items: Vec::new(),
            responses: BTreeMap::new(),
            exports: 0,
            revision: 0,
            dirty: false,
            last_saved: Instant::now(),
            written: Arc::new(Mutex::new(None)),
        })
    }

    /// Reload a session from its last auto-save.
    pub fn recover(path: &Path, registry: ModeRegistry) -> Result<Self> {
        let snapshot: SessionSnapshot = read_json(path)?;
        validate_session_id(&snapshot.session_id)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        info!(
            session = %snapshot.session_id,
            items = snapshot.items.len(),
            judged = snapshot.responses.len(),
            "recovered validation session"
        );
        Ok(Self {
            session_id: snapshot.session_id,
            dir,
            registry,
            auto_save_interval: Duration::from_millis(snapshot.auto_save_ms),
            created_at: snapshot.created_at,
            items: snapshot.items,
            responses: snapshot.responses,
            exports: snapshot.exports,
            revision: 0,
            dirty: false,
            last_saved: Instant::now(),
            written: Arc::new(Mutex::new(None)),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn items(&self) -> &[ValidationItem] {
        &self.items
    }

    pub fn response(&self, id: ItemId) -> Option<&ValidationResponse> {
        self.responses.get(&id)
    }

    pub fn judged_count(&self) -> usize {
        self.responses.len()
    }

    /// Items still waiting for a verdict, in insertion order.
    pub fn pending(&self) -> impl Iterator<Item = &ValidationItem> {
        self.items
            .iter()
            .filter(|item| !self.responses.contains_key(&item.id))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Path of the auto-save snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(format!("session_{}.json", self.session_id))
    }

    /// Queue an item for review, then auto-save if due.
    pub fn add_item(&mut self, payload: ItemPayload) -> Result<ItemId> {
        self.check_payload(&payload)?;

        let next = self.items.last().map_or(1, |item| item.id.0 + 1);
        let id = ItemId(next);
        debug!(item = %id, kind = %payload.kind(), "queued validation item");
        self.items.push(ValidationItem {
            id,
            payload,
            added_at: Utc::now(),
        });
        self.touch();
        self.auto_save_if_due();
        Ok(id)
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }

    fn auto_save_if_due(&mut self) {
        if let Err(e) = self.maybe_auto_save() {
            warn!(error = %e, session = %self.session_id, "auto-save failed; will retry");
        }
    }

    fn check_payload(&self, payload: &ItemPayload) -> Result<()> {
        match payload {
            ItemPayload::RagAnswer { question, .. } if question.trim().is_empty() => {
                Err(EvalError::InvalidItem("rag answer needs a question".to_string()))
            }
            ItemPayload::Chart { prompt, .. } if prompt.trim().is_empty() => {
                Err(EvalError::InvalidItem("chart needs a prompt".to_string()))
            }
            ItemPayload::ModeComparison { modes, .. } => {
                if modes.is_empty() {
                    return Err(EvalError::InvalidItem(
                        "mode comparison needs at least one mode".to_string(),
                    ));
                }
                for name in modes.keys() {
                    self.registry.get(*name)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Record (or replace) the verdict for an item, then auto-save if due.
    /// Without a background task the next save waits for the next call.
    pub fn judge(&mut self, id: ItemId, judgment: Judgment) -> Result<&ValidationResponse> {
        let item = self
            .items
            .iter()
            .find(|item| item.id == id)
            .ok_or(EvalError::UnknownItem(id.0))?;

        if let Some(rating) = judgment.rating {
            if !(1..=5).contains(&rating) {
                return Err(EvalError::InvalidRating(rating));
            }
        }
        if let Some(mode) = judgment.best_mode {
            let offered = item.payload.modes().is_some_and(|m| m.contains_key(&mode));
            if !offered {
                return Err(EvalError::InvalidModeSelection {
                    item_id: id.0,
                    mode: mode.to_string(),
                });
            }
        }

        let response = ValidationResponse::record(item, judgment);
        debug!(item = %id, verdict = %response.verdict, "recorded verdict");
        self.responses.insert(id, response);
        self.touch();
        self.auto_save_if_due();

        self.responses
            .get(&id)
            .ok_or(EvalError::UnknownItem(id.0))
    }

    /// Write the full session atomically.
    pub fn auto_save(&mut self) -> Result<PathBuf> {
        let pending = self.pending_save();
        let path = pending.write()?;
        self.mark_saved(pending.revision());
        debug!(path = %path.display(), "session auto-saved");
        Ok(path)
    }

    pub(crate) fn pending_save(&self) -> PendingSave {
        PendingSave {
            path: self.snapshot_path(),
            snapshot: SessionSnapshot {
                session_id: self.session_id.clone(),
                created_at: self.created_at,
                saved_at: Utc::now(),
                auto_save_ms: u64::try_from(self.auto_save_interval.as_millis())
                    .unwrap_or(u64::MAX),
                exports: self.exports,
                items: self.items.clone(),
                responses: self.responses.clone(),
            },
            revision: self.revision,
            written: Arc::clone(&self.written),
        }
    }

    /// Clear `dirty` if nothing changed since `revision` was taken.
    pub(crate) fn mark_saved(&mut self, revision: u64) {
        if self.revision == revision {
            self.dirty = false;
        }
        self.last_saved = Instant::now();
    }

    /// Save when there are unsaved changes and the interval has elapsed.
    pub fn maybe_auto_save(&mut self) -> Result<bool> {
        if self.dirty && self.last_saved.elapsed() >= self.auto_save_interval {
            self.auto_save()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Bundle items and responses. Each call gets a fresh report id; the
    /// session keeps its state and may be judged further.
    pub fn export(&mut self) -> ValidationExport {
        self.exports += 1;
        self.touch();
        let generated_at = Utc::now();
        let report_id = format!(
            "{}_{}_{}",
            self.session_id,
            generated_at.format("%Y%m%d_%H%M%S"),
            self.exports
        );

        let total_items = self.items.len();
        let judged_items = self.responses.len();
        info!(report = %report_id, total_items, judged_items, "exported validation results");
        ValidationExport {
            report_id,
            session_id: self.session_id.clone(),
            generated_at,
            total_items,
            judged_items,
            complete: judged_items == total_items,
            items: self.items.clone(),
            responses: self.responses.clone(),
        }
    }

    /// Export and write `validation_results_<report_id>.json` into the
    /// session directory.
    pub fn export_to_dir(&mut self) -> Result<(ValidationExport, PathBuf)> {
        let export = self.export();
        let path = self
            .dir
            .join(format!("validation_results_{}.json", export.report_id));
        write_json_atomic(&export, &path)?;
        Ok((export, path))
    }

    /// Plain-text listing of every item and its verdict.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Validation session: {}", self.session_id);
        let _ = writeln!(
            out,
            "Items: {} ({} judged)",
            self.items.len(),
            self.responses.len()
        );

        for item in &self.items {
            let _ = writeln!(out);
            let _ = writeln!(out, "[{}] {}", item.id, item.kind());
            match &item.payload {
                ItemPayload::RagAnswer {
                    question,
                    answer,
                    contexts,
                    ..
                } => {
                    let _ = writeln!(out, "Question: {}", question);
                    let _ = writeln!(out, "Answer: {}", answer);
                    for (i, context) in contexts.iter().enumerate() {
                        let _ = writeln!(out, "Context {}: {}", i + 1, preview(context, 200));
                    }
                }
                ItemPayload::Chart {
                    prompt, chart_path, ..
                } => {
                    let _ = writeln!(out, "Prompt: {}", prompt);
                    let _ = writeln!(out, "Chart: {}", chart_path);
                }
                ItemPayload::ModeComparison {
                    query,
                    query_type,
                    expected_answer,
                    modes,
                } => {
                    let _ = writeln!(out, "Query: {} ({})", query, query_type);
                    if let Some(expected) = expected_answer {
                        let _ = writeln!(out, "Expected: {}", expected);
                    }
                    for (name, answer) in modes {
                        let label = self
                            .registry
                            .get(*name)
                            .map_or_else(|_| name.to_string(), |m| m.label.clone());
                        let _ = writeln!(
                            out,
                            "  {} [{} ms, {} sources]: {}",
                            label,
                            answer.response_time_ms,
                            answer.sources.len(),
                            preview(&answer.answer, 200)
                        );
                    }
                }
            }

            match self.responses.get(&item.id) {
                Some(response) => {
                    let mut line = format!("Verdict: {}", response.verdict);
                    if let Some(rating) = response.rating {
                        let _ = write!(line, ", rating {}/5", rating);
                    }
                    if let Some(mode) = response.best_mode {
                        let _ = write!(line, ", best mode {}", mode);
                    }
                    let _ = writeln!(out, "{}", line);
                    if !response.notes.is_empty() {
                        let _ = writeln!(out, "Notes: {}", response.notes);
                    }
                }
                None => {
                    let _ = writeln!(out, "Verdict: pending");
                }
            }
        }
        out
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(EvalError::InvalidSessionId(session_id.to_string()))
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{ModeConfig, ModeName};
    use crate::validation::item::{ModeAnswer, Verdict};
    use tempfile::TempDir;

    fn rag_item(n: usize) -> ItemPayload {
        ItemPayload::RagAnswer {
            question: format!("Question {}?", n),
            answer: format!("Answer {}.", n),
            contexts: vec![format!("Context for {}", n)],
            metadata: BTreeMap::new(),
        }
    }

    fn comparison(modes: &[ModeName]) -> ItemPayload {
        ItemPayload::ModeComparison {
            query: "Which region sold most?".to_string(),
            query_type: "aggregation".to_string(),
            expected_answer: Some("North".to_string()),
            modes: modes
                .iter()
                .map(|m| {
                    (
                        *m,
                        ModeAnswer {
                            answer: "North".to_string(),
                            response_time_ms: 1500,
                            sources: vec![],
                            confidence: None,
                        },
                    )
                })
                .collect(),
        }
    }

    fn session(dir: &Path, interval: Duration) -> ValidationSession {
        ValidationSession::new("s1", dir, ModeRegistry::standard(), interval).unwrap()
    }

    #[test]
    fn test_export_counts_partial_session() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));

        let ids: Vec<ItemId> = (0..7).map(|n| session.add_item(rag_item(n)).unwrap()).collect();
        assert_eq!(ids.first(), Some(&ItemId(1)));
        assert_eq!(ids.last(), Some(&ItemId(7)));

        for id in &ids[..5] {
            session.judge(*id, Judgment::new(Verdict::Accurate)).unwrap();
        }

        let export = session.export();
        assert_eq!(export.total_items, 7);
        assert_eq!(export.judged_items, 5);
        assert_eq!(export.responses.len(), 5);
        assert!(!export.complete);
        assert!((export.completion_pct() - 500.0 / 7.0).abs() < 1e-9);
        assert_eq!(session.pending().count(), 2);
    }

    #[test]
    fn test_complete_only_when_all_judged() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        let a = session.add_item(rag_item(1)).unwrap();
        let b = session.add_item(rag_item(2)).unwrap();

        session.judge(a, Judgment::new(Verdict::Partial)).unwrap();
        assert!(!session.export().complete);
        session.judge(b, Judgment::new(Verdict::Inaccurate)).unwrap();

        let export = session.export();
        assert!(export.complete);
        assert_eq!(export.completion_pct(), 100.0);
    }

    #[test]
    fn test_rejudge_overwrites() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        let id = session.add_item(rag_item(1)).unwrap();

        session.judge(id, Judgment::new(Verdict::Inaccurate)).unwrap();
        session
            .judge(id, Judgment::new(Verdict::Accurate).with_notes("on second look"))
            .unwrap();

        assert_eq!(session.judged_count(), 1);
        let response = session.response(id).unwrap();
        assert_eq!(response.verdict, Verdict::Accurate);
        assert_eq!(response.notes, "on second look");
    }

    #[test]
    fn test_judge_errors() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        let rag = session.add_item(rag_item(1)).unwrap();
        let cmp = session
            .add_item(comparison(&[ModeName::Basic, ModeName::Deep]))
            .unwrap();

        assert!(matches!(
            session.judge(ItemId(99), Judgment::new(Verdict::Accurate)),
            Err(EvalError::UnknownItem(99))
        ));
        assert!(matches!(
            session.judge(rag, Judgment::new(Verdict::Accurate).with_rating(6)),
            Err(EvalError::InvalidRating(6))
        ));
        assert!(matches!(
            session.judge(rag, Judgment::new(Verdict::Accurate).with_rating(0)),
            Err(EvalError::InvalidRating(0))
        ));
        assert!(matches!(
            session.judge(cmp, Judgment::new(Verdict::Accurate).with_best_mode(ModeName::Both)),
            Err(EvalError::InvalidModeSelection { item_id: 2, .. })
        ));
        assert!(matches!(
            session.judge(rag, Judgment::new(Verdict::Accurate).with_best_mode(ModeName::Basic)),
            Err(EvalError::InvalidModeSelection { .. })
        ));
        assert_eq!(session.judged_count(), 0);

        let response = session
            .judge(cmp, Judgment::new(Verdict::Accurate).with_best_mode(ModeName::Deep).with_rating(5))
            .unwrap();
        assert_eq!(response.best_mode, Some(ModeName::Deep));
    }

    #[test]
    fn test_mode_comparison_needs_registered_mode() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            session(dir.path(), Duration::ZERO).add_item(comparison(&[])),
            Err(EvalError::InvalidItem(_))
        ));

        let basic_only = ModeRegistry::from_modes(
            ModeRegistry::standard()
                .iter()
                .filter(|m| m.name == ModeName::Basic)
                .cloned()
                .collect::<Vec<ModeConfig>>(),
        )
        .unwrap();
        let mut narrow =
            ValidationSession::new("s2", dir.path(), basic_only, Duration::ZERO).unwrap();
        assert!(matches!(
            narrow.add_item(comparison(&[ModeName::Deep])),
            Err(EvalError::UnknownMode(_))
        ));
        assert!(narrow.add_item(comparison(&[ModeName::Basic])).is_ok());
    }

    #[test]
    fn test_recover_after_crash() {
        let dir = TempDir::new().unwrap();
        let snapshot;
        {
            // Zero interval: every judgment is persisted immediately.
            let mut session = session(dir.path(), Duration::ZERO);
            for n in 0..3 {
                session.add_item(rag_item(n)).unwrap();
            }
            session
                .judge(ItemId(2), Judgment::new(Verdict::Partial).with_rating(3))
                .unwrap();
            assert!(!session.is_dirty());
            snapshot = session.snapshot_path();
            // Dropped without export.
        }

        let mut recovered = ValidationSession::recover(&snapshot, ModeRegistry::standard()).unwrap();
        assert_eq!(recovered.session_id(), "s1");
        assert_eq!(recovered.items().len(), 3);
        assert_eq!(recovered.response(ItemId(2)).unwrap().rating, Some(3));

        let next = recovered.add_item(rag_item(9)).unwrap();
        assert_eq!(next, ItemId(4));
    }

    #[test]
    fn test_add_item_saves_when_due() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_millis(200));
        let id = session.add_item(rag_item(1)).unwrap();
        assert!(session.is_dirty());

        std::thread::sleep(Duration::from_millis(250));
        session.add_item(rag_item(2)).unwrap();
        assert!(!session.is_dirty());
        let recovered =
            ValidationSession::recover(&session.snapshot_path(), ModeRegistry::standard()).unwrap();
        assert_eq!(recovered.items().len(), 2);

        session.judge(id, Judgment::new(Verdict::Accurate)).unwrap();
        assert!(session.is_dirty());
    }

    #[test]
    fn test_sub_second_interval_survives_recover() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_millis(250));
        let path = session.auto_save().unwrap();

        let mut recovered = ValidationSession::recover(&path, ModeRegistry::standard()).unwrap();
        recovered.add_item(rag_item(1)).unwrap();
        // A zero interval would have saved right away.
        assert!(recovered.is_dirty());
    }

    #[test]
    fn test_stale_snapshot_does_not_clear_dirty() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        session.add_item(rag_item(1)).unwrap();

        let pending = session.pending_save();
        session.add_item(rag_item(2)).unwrap();
        pending.write().unwrap();
        session.mark_saved(pending.revision());
        assert!(session.is_dirty());

        session.auto_save().unwrap();
        assert!(!session.is_dirty());
        // An older snapshot never replaces a newer one on disk.
        pending.write().unwrap();
        let recovered =
            ValidationSession::recover(&session.snapshot_path(), ModeRegistry::standard()).unwrap();
        assert_eq!(recovered.items().len(), 2);
    }

    #[test]
    fn test_maybe_auto_save_respects_interval() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        let id = session.add_item(rag_item(1)).unwrap();
        session.judge(id, Judgment::new(Verdict::Accurate)).unwrap();

        assert!(session.is_dirty());
        assert!(!session.maybe_auto_save().unwrap());
        assert!(!session.snapshot_path().exists());

        session.auto_save().unwrap();
        assert!(session.snapshot_path().exists());
        assert!(!session.maybe_auto_save().unwrap());
    }

    #[test]
    fn test_export_to_dir_keeps_state() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        let id = session.add_item(rag_item(1)).unwrap();

        let (first, path) = session.export_to_dir().unwrap();
        assert!(path.exists());
        assert_eq!(first.judged_items, 0);

        session.judge(id, Judgment::new(Verdict::Accurate)).unwrap();
        let (second, _) = session.export_to_dir().unwrap();
        assert_ne!(first.report_id, second.report_id);
        assert_eq!(second.judged_items, 1);

        let loaded = ValidationExport::load(&path).unwrap();
        assert_eq!(loaded, first);
    }

    #[test]
    fn test_invalid_session_id() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ValidationSession::new("../x", dir.path(), ModeRegistry::standard(), Duration::ZERO),
            Err(EvalError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn test_render_is_stable() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path(), Duration::from_secs(3600));
        let id = session.add_item(rag_item(1)).unwrap();
        session.add_item(comparison(&[ModeName::Basic])).unwrap();
        session
            .judge(id, Judgment::new(Verdict::Accurate).with_rating(4).with_notes("fine"))
            .unwrap();

        let text = session.render();
        assert_eq!(text, session.render());
        assert!(text.contains("Items: 2 (1 judged)"));
        assert!(text.contains("[1] rag_answer"));
        assert!(text.contains("Verdict: accurate, rating 4/5"));
        assert!(text.contains("Verdict: pending"));
    }
}
