//! Session-scoped key/value storage.
//!
//! The session keeps two things here: its own identity and the ordered set
//! of remote identifiers it should reconnect to after a reload. Values are
//! plain strings; callers serialize structured data themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// String-keyed storage scoped to one session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn delete(&self, key: &str);
}

/// Volatile store, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }

    fn delete(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
    }
}

/// JSON file backed store, rewritten atomically on every change.
///
/// Read errors and parse errors start from an empty store; write errors are
/// logged and leave the in-memory view authoritative.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::read_from_file(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_from_file(path: &Path) -> BTreeMap<String, String> {
        if !path.exists() {
            return BTreeMap::new();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(values) => {
                    debug!(event = "session_store_loaded", path = %path.display(), "Session store loaded");
                    values
                }
                Err(e) => {
                    error!(
                        event = "session_store_parse_failure",
                        path = %path.display(),
                        error = %e,
                        "Failed to parse session store, starting fresh"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) => {
                warn!(
                    event = "session_store_read_failure",
                    path = %path.display(),
                    error = %e,
                    "Failed to read session store"
                );
                BTreeMap::new()
            }
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) {
        let content = match serde_json::to_string_pretty(values) {
            Ok(content) => content,
            Err(e) => {
                error!(event = "session_store_encode_failure", error = %e, "Failed to encode session store");
                return;
            }
        };
        if let Err(e) = crate::utils::atomic_write::atomic_write(&self.path, content.as_bytes()) {
            warn!(event = "session_store_save_failure", path = %self.path.display(), error = %e, "Session store not saved");
        }
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
            self.save(&values);
        }
    }

    fn delete(&self, key: &str) {
        if let Ok(mut values) = self.values.lock()
            && values.remove(key).is_some()
        {
            self.save(&values);
        }
    }
}
