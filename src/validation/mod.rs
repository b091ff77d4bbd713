//! Human-in-the-loop validation of answers, charts and mode comparisons.

mod autosave;
mod item;
pub mod review;
mod session;

pub use autosave::{AutoSaveHandle, spawn_auto_save};
pub use item::{
    ItemId, ItemKind, ItemPayload, Judgment, ModeAnswer, ValidationItem, ValidationResponse,
    Verdict,
};
pub use session::{ValidationExport, ValidationSession};
