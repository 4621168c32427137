//! Persistent key-value state store.
//!
//! The store holds the run's durable state under a handful of named keys
//! (see [`keys`]). Writes are full-document overwrites; a single logical
//! flow owns the store, so no cross-process coordination is attempted.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

/// Well-known state keys.
///
/// The names keep the original camelCase spelling so documents written by
/// earlier versions of the client import cleanly.
pub mod keys {
    /// Subfolder (under the download root) the run writes into.
    pub const DOWNLOAD_FOLDER: &str = "downloadFolder";
    /// Whether a run is active; reset to `false` on host restart.
    pub const IS_DOWNLOADING: &str = "isDownloading";
    /// Last human-readable status line emitted.
    pub const LAST_STATUS: &str = "lastStatus";
    /// The dedup summary ledger, id → record.
    pub const DOWNLOAD_SUMMARY: &str = "downloadSummary";
}

/// Key-value persistence collaborator.
pub trait StateStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn set(&self, key: &str, value: Value) -> std::io::Result<()>;

    /// Stores `value` under `key`, logging instead of failing.
    ///
    /// Persistence failures are never fatal to a run; the in-memory state
    /// stays authoritative and the write is retried on the next change.
    fn set_soft(&self, key: &str, value: Value) {
        if let Err(e) = self.set(key, value) {
            log::warn!("failed to persist {key}: {e}");
        }
    }
}

/// File-backed store holding all keys in one JSON document.
///
/// Saves are atomic (write to a temp file, then rename). A missing or
/// unreadable document loads as empty; the store never fails a read.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading any existing document.
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        let cache = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!("discarding unreadable state at {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn save_locked(&self, cache: &BTreeMap<String, Value>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(cache)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> std::io::Result<()> {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(key.to_string(), value);
        self.save_locked(&cache)
    }
}

/// Ephemeral in-memory store.
///
/// Useful for tests and for embedders that manage persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> std::io::Result<()> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}
