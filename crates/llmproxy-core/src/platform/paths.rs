//! Search-path composition.

use crate::error::{Result, SupervisorError};
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// Append `extra` directories to an inherited search path.
///
/// Inherited entries keep their precedence; directories already present are
/// not repeated. A missing or empty inherited value yields just `extra`.
///
/// # Errors
/// Returns a config error if a directory contains the platform's path
/// separator and therefore cannot be joined.
pub fn extend_search_path(current: Option<&OsStr>, extra: &[PathBuf]) -> Result<OsString> {
    let mut entries: Vec<PathBuf> = current
        .filter(|value| !value.is_empty())
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();

    for dir in extra {
        if !entries.contains(dir) {
            entries.push(dir.clone());
        }
    }

    std::env::join_paths(entries).map_err(|e| SupervisorError::Config {
        message: format!("Cannot compose search path: {}", e),
    })
}
