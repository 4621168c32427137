//! Media item model, listing envelopes, and queue construction rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File extensions that never enter the download queue. `json` files are
/// metadata sidecars the service stores alongside real media.
pub const EXCLUDED_EXTENSIONS: &[&str] = &["json"];

/// Item types that never enter the download queue. `MultiClipEdit` is a
/// composite edit with no standalone binary.
pub const EXCLUDED_TYPES: &[&str] = &["MultiClipEdit"];

/// One media object known to the remote library.
///
/// Fields the downloader acts on are typed; everything else the service
/// returns is carried verbatim in `extra` so the sidecar document can
/// reproduce the full remote record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable identity of the item.
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
    /// Size reported by item metadata, in bytes. Not always present.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Remote item type (`Photo`, `Video`, `Burst`, ...).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub captured_at: Option<String>,
    /// Remaining remote metadata, preserved for the sidecar.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MediaItem {
    /// Returns `true` if the item should enter the download queue.
    ///
    /// Items with a missing filename or extension, a sidecar extension, or
    /// an excluded type have no standalone binary to fetch.
    #[must_use]
    pub fn is_downloadable(&self) -> bool {
        let has_name = self.filename.as_deref().is_some_and(|f| !f.is_empty());
        let extension_ok = self
            .file_extension
            .as_deref()
            .is_some_and(|e| !e.is_empty() && !EXCLUDED_EXTENSIONS.contains(&e));
        let type_ok = self
            .kind
            .as_deref()
            .is_none_or(|t| !EXCLUDED_TYPES.contains(&t));
        has_name && extension_ok && type_ok
    }

    /// Returns the item's filename, falling back to its id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.filename
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.id)
    }
}

/// Builds the download queue from a raw listing.
///
/// The queue is ordered as listed and immutable for the rest of the run.
#[must_use]
pub fn build_queue(items: Vec<MediaItem>) -> Vec<MediaItem> {
    items.into_iter().filter(MediaItem::is_downloadable).collect()
}

/// One page of the listing endpoint's response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaPage {
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<PageEmbedded>,
    #[serde(rename = "_pages", default)]
    pub pages: Option<PageInfo>,
}

/// The `_embedded` member of a listing page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageEmbedded {
    #[serde(default)]
    pub media: Option<Vec<MediaItem>>,
}

/// The `_pages` member of a listing page.
#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub total_pages: Option<u32>,
}

impl MediaPage {
    /// Total page count advertised by the envelope, defaulting to 1.
    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.pages
            .as_ref()
            .and_then(|p| p.total_pages)
            .unwrap_or(1)
    }

    /// Consumes the page, yielding its items. A missing item collection is
    /// an empty page, not an error.
    #[must_use]
    pub fn into_items(self) -> Vec<MediaItem> {
        self.embedded.and_then(|e| e.media).unwrap_or_default()
    }
}
