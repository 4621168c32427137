//! The dedup summary: a persisted ledger of downloaded items.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaItem;
use crate::store::{StateStore, keys};

/// Last known download record for one item, keyed by item id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub filename: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub downloaded_at: DateTime<Utc>,
    pub folder: String,
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub captured_at: Option<String>,
}

impl SummaryRecord {
    /// Builds a record for a completed transfer. The size comes from item
    /// metadata, not from measured bytes, so later tolerance checks compare
    /// like with like.
    #[must_use]
    pub fn from_item(item: &MediaItem, folder: &str) -> Self {
        Self::with_size(item, folder, item.file_size)
    }

    /// Builds a record synthesized from a file found on disk, carrying the
    /// probed byte size.
    #[must_use]
    pub fn from_probe(item: &MediaItem, folder: &str, byte_size: u64) -> Self {
        Self::with_size(item, folder, Some(byte_size))
    }

    fn with_size(item: &MediaItem, folder: &str, file_size: Option<u64>) -> Self {
        Self {
            filename: item.display_name().to_string(),
            file_size,
            downloaded_at: Utc::now(),
            folder: folder.to_string(),
            id: item.id.clone(),
            kind: item.kind.clone(),
            captured_at: item.captured_at.clone(),
        }
    }
}

/// Result of merging an imported summary into the local one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Ids that were absent locally before the merge.
    pub new_count: usize,
    /// Ids that existed locally and were overwritten.
    pub updated_count: usize,
}

/// User-saved snapshot of the summary ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryExport {
    pub exported_at: DateTime<Utc>,
    pub total_files: usize,
    pub files: HashMap<String, SummaryRecord>,
}

/// The persisted dedup ledger.
///
/// Loading fails soft: a missing or unreadable ledger becomes an empty one
/// and the run proceeds on in-memory state. Saves overwrite the full
/// mapping and log failures rather than propagating them.
pub struct SummaryStore {
    store: Arc<dyn StateStore>,
    files: HashMap<String, SummaryRecord>,
}

impl SummaryStore {
    /// Loads the ledger from the backing store.
    #[must_use]
    pub fn load(store: Arc<dyn StateStore>) -> Self {
        let files = store
            .get(keys::DOWNLOAD_SUMMARY)
            .map(|value| match serde_json::from_value(value) {
                Ok(files) => files,
                Err(e) => {
                    log::warn!("discarding unreadable download summary: {e}");
                    HashMap::new()
                }
            })
            .unwrap_or_default();
        Self { store, files }
    }

    /// Returns `true` if the ledger has a record for `id`.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }

    /// Returns the record for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SummaryRecord> {
        self.files.get(id)
    }

    /// Inserts or overwrites the record keyed by its item id.
    pub fn put(&mut self, record: SummaryRecord) {
        self.files.insert(record.id.clone(), record);
    }

    /// Persists the full mapping. Failures are logged, never fatal.
    pub fn save(&self) {
        match serde_json::to_value(&self.files) {
            Ok(value) => self.store.set_soft(keys::DOWNLOAD_SUMMARY, value),
            Err(e) => log::warn!("failed to serialize download summary: {e}"),
        }
    }

    /// Merges `imported` into the ledger, overwriting existing ids, then
    /// persists. Importing the same mapping twice reports zero new ids the
    /// second time.
    pub fn merge(&mut self, imported: HashMap<String, SummaryRecord>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (id, record) in imported {
            if self.files.contains_key(&id) {
                outcome.updated_count += 1;
            } else {
                outcome.new_count += 1;
            }
            self.files.insert(id, record);
        }
        self.save();
        outcome
    }

    /// Empties the ledger and persists. Irreversible; callers must confirm
    /// destructive intent with the user before invoking.
    pub fn clear(&mut self) {
        self.files.clear();
        self.save();
    }

    /// Produces the user-saved export document.
    #[must_use]
    pub fn export(&self) -> SummaryExport {
        SummaryExport {
            exported_at: Utc::now(),
            total_files: self.files.len(),
            files: self.files.clone(),
        }
    }

    /// Number of records in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the ledger has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of recorded file sizes, for at-a-glance ledger stats.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.values().filter_map(|r| r.file_size).sum()
    }
}
