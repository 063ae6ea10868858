//! Write-to-temp-then-rename for the session store file.
//!
//! Invariants:
//! - Write goes to a sibling `<name>.tmp` file first, then a rename replaces the target.
//! - On rename failure, the temp file is removed.
//! - Parent directories are created if absent.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::error;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write `content` to `path` via a temporary file and rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let tmp_path = temp_path(path);

    std::fs::write(&tmp_path, content).map_err(|e| {
        error!(
            event = "atomic_write_failure",
            path = %tmp_path.display(),
            error = %e,
            "Failed to write temp file"
        );
        e
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        error!(
            event = "atomic_rename_failure",
            from = %tmp_path.display(),
            to = %path.display(),
            error = %e,
            "Failed to rename temp file"
        );
        let _ = std::fs::remove_file(&tmp_path);
        e
    })?;

    Ok(())
}
