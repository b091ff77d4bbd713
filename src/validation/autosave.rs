//! Background auto-save for a shared session.

use super::session::ValidationSession;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stops the auto-save task when dropped.
pub struct AutoSaveHandle {
    task: JoinHandle<()>,
}

impl AutoSaveHandle {
    /// Stop the task now.
    pub fn stop(self) {}
}

impl Drop for AutoSaveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Save `session` every `interval` while it has unsaved changes, so verdicts
/// reach disk even when no further calls arrive. Must be called inside a
/// tokio runtime. The snapshot is taken under the lock and written on the
/// blocking pool.
pub fn spawn_auto_save(session: Arc<Mutex<ValidationSession>>, interval: Duration) -> AutoSaveHandle {
    let period = interval.max(Duration::from_millis(10));
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pending = {
                let guard = session.lock();
                guard.is_dirty().then(|| guard.pending_save())
            };
            let Some(pending) = pending else {
                continue;
            };
            let revision = pending.revision();
            match tokio::task::spawn_blocking(move || pending.write()).await {
                Ok(Ok(path)) => {
                    session.lock().mark_saved(revision);
                    debug!(path = %path.display(), "background auto-save");
                }
                Ok(Err(e)) => warn!(error = %e, "background auto-save failed"),
                Err(e) => warn!(error = %e, "background auto-save task failed"),
            }
        }
    });
    AutoSaveHandle { task }
}
