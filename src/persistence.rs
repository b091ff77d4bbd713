//! JSON persistence helpers shared by the benchmark store and validation
//! sessions.
//!
//! Writes go to a sibling temp file which is synced and then renamed over
//! the target, so a crash mid-write leaves the previous version intact.

use crate::error::{EvalError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| EvalError::io(path, e))?;
    file.write_all(bytes).map_err(|e| EvalError::io(path, e))?;
    file.sync_all().map_err(|e| EvalError::io(path, e))
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }

    let data =
        serde_json::to_vec_pretty(value).map_err(|e| EvalError::Serialization(e.to_string()))?;

    let tmp = temp_path(path);
    write_and_sync(&tmp, &data)?;
    fs::rename(&tmp, path).map_err(|e| EvalError::io(path, e))?;

    Ok(())
}

/// Write plain text atomically (reports).
pub fn write_text_atomic(text: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }
    let tmp = temp_path(path);
    write_and_sync(&tmp, text.as_bytes())?;
    fs::rename(&tmp, path).map_err(|e| EvalError::io(path, e))
}

/// Load a JSON document. Parse failures come back as `Serialization`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path).map_err(|e| EvalError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| EvalError::Serialization(e.to_string()))
}

/// Check if a regular file exists at the given path.
pub fn file_exists(path: &Path) -> bool {
    path.exists() && path.is_file()
}
