//! Data directory for persistent storage.
//!
//! Defaults to `~/.peerlink/` but can be overridden via `--conf`.
//! Initialized once at startup via `init()`; later calls keep the first value.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Resolve and remember the data directory, creating it if needed.
///
/// If `custom` is `Some`, uses that path. Otherwise falls back to `~/.peerlink/`.
pub fn init(custom: Option<&Path>) -> Result<&'static Path> {
    let dir = match custom {
        Some(p) => p.to_path_buf(),
        None => dirs::home_dir()
            .context("no home directory found, pass --conf")?
            .join(".peerlink"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create data directory {}", dir.display()))?;
    Ok(DATA_DIR.get_or_init(|| dir).as_path())
}
