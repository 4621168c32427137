//! Media API client: paginated library listing and download-URL resolution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use serde::Deserialize;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::events::StatusSink;
use crate::media::{MediaItem, MediaPage};

/// Versioned media-search content type the service expects.
pub const ACCEPT_HEADER: &str = "application/vnd.gopro.jk.media.search+json; version=2.0.0";

/// Field list requested from the listing endpoint.
pub const SEARCH_FIELDS: &str = "camera_model,captured_at,content_title,content_type,created_at,\
gopro_user_id,gopro_media,filename,file_extension,file_size,height,fov,id,item_count,mce_type,\
moments_count,on_public_profile,orientation,play_as,ready_to_edit,ready_to_view,resolution,\
source_duration,token,type,width,submitted_at,thumbnail_available,captured_at_timezone,\
available_labels";

/// Processing states whose items are listed.
pub const PROCESSING_STATES: &str = "rendering,pretranscoding,transcoding,ready";

/// Item types requested from the listing endpoint. `MultiClipEdit` is
/// listed (it appears in library counts) but excluded at queue build time.
pub const ITEM_TYPES: &str =
    "Burst,BurstVideo,Continuous,LoopedVideo,Photo,TimeLapse,TimeLapseVideo,Video,MultiClipEdit";

/// The variation label carrying the authoritative direct-download URL.
const SOURCE_LABEL: &str = "source";

/// Envelope of the per-item URL-resolution endpoint.
#[derive(Debug, Default, Deserialize)]
struct DownloadVariations {
    #[serde(rename = "_embedded", default)]
    embedded: Option<VariationsEmbedded>,
}

#[derive(Debug, Default, Deserialize)]
struct VariationsEmbedded {
    #[serde(default)]
    variations: Vec<Variation>,
}

#[derive(Debug, Deserialize)]
struct Variation {
    #[serde(default)]
    label: String,
    #[serde(default)]
    url: String,
}

impl DownloadVariations {
    /// Picks the `source` variation's URL, if the envelope has one.
    fn source_url(self) -> Option<String> {
        self.embedded?
            .variations
            .into_iter()
            .find(|v| v.label == SOURCE_LABEL)
            .map(|v| v.url)
            .filter(|url| !url.is_empty())
    }
}

/// Remote media API operations the orchestrator depends on.
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Fetches one page of the library listing.
    async fn fetch_page(&self, page: u32) -> Result<MediaPage>;

    /// Resolves the direct download URL for one item. `Ok(None)` means the
    /// service offered no source variation; that is a skip, not an error.
    async fn resolve_source_url(&self, id: &str) -> Result<Option<String>>;
}

/// Builds the HTTP client used for API calls and transfers.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// `MediaApi` implementation backed by the real HTTP service.
pub struct HttpMediaApi {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
    page_size: u32,
}

impl HttpMediaApi {
    /// Creates an API client from the run configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RunConfig) -> Result<Self> {
        Ok(Self::with_client(build_http_client()?, config))
    }

    /// Creates an API client reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, config: &RunConfig) -> Self {
        Self {
            http,
            base: config.api_base.trim_end_matches('/').to_string(),
            token: config.auth_token.clone(),
            page_size: config.page_size,
        }
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl MediaApi for HttpMediaApi {
    async fn fetch_page(&self, page: u32) -> Result<MediaPage> {
        let response = self
            .request(format!("{}/media/search", self.base))
            .query(&[
                ("processing_states", PROCESSING_STATES),
                ("fields", SEARCH_FIELDS),
                ("type", ITEM_TYPES),
            ])
            .query(&[("page", page), ("per_page", self.page_size)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn resolve_source_url(&self, id: &str) -> Result<Option<String>> {
        let response = self
            .request(format!("{}/media/{id}/download", self.base))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        let variations: DownloadVariations = serde_json::from_str(&body)?;
        Ok(variations.source_url())
    }
}

/// Enumerates the full library by walking listing pages.
pub struct MediaLister {
    api: Arc<dyn MediaApi>,
    events: Arc<dyn StatusSink>,
}

impl MediaLister {
    /// Creates a lister over the given API.
    #[must_use]
    pub fn new(api: Arc<dyn MediaApi>, events: Arc<dyn StatusSink>) -> Self {
        Self { api, events }
    }

    /// Fetches every page and materializes the full item list.
    ///
    /// The page count comes from each response envelope (default 1 when
    /// absent); a page without an item collection contributes zero items
    /// but does not abort the walk.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails or decodes badly; a
    /// listing failure aborts the whole run.
    pub async fn list_all(&self) -> Result<Vec<MediaItem>> {
        let mut all = Vec::new();
        let mut page = 1;
        let mut total_pages = 1;

        while page <= total_pages {
            let envelope = self.api.fetch_page(page).await?;
            total_pages = envelope.total_pages();
            all.extend(envelope.into_items());
            self.events
                .status(&format!("📄 Fetched page {page}/{total_pages}"));
            page += 1;
        }

        Ok(all)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::NoStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted `MediaApi` used across the crate's tests.
    pub(crate) struct MockMediaApi {
        pages: Vec<serde_json::Value>,
        pub(crate) fetch_calls: AtomicUsize,
        /// Ids that resolve to no source variation.
        pub(crate) no_url_ids: Vec<String>,
        /// Ids whose URL resolution fails outright.
        pub(crate) error_ids: Vec<String>,
        /// Fail every listing fetch.
        pub(crate) fail_listing: bool,
        /// When set, every `fetch_page` waits for a permit first.
        pub(crate) gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    impl MockMediaApi {
        pub(crate) fn new(pages: Vec<serde_json::Value>) -> Self {
            Self {
                pages,
                fetch_calls: AtomicUsize::new(0),
                no_url_ids: Vec::new(),
                error_ids: Vec::new(),
                fail_listing: false,
                gate: None,
            }
        }

        /// Single page listing exactly these items.
        pub(crate) fn single_page(items: &[crate::media::MediaItem]) -> Self {
            Self::new(vec![json!({
                "_embedded": {"media": items},
                "_pages": {"total_pages": 1}
            })])
        }
    }

    #[async_trait]
    impl MediaApi for MockMediaApi {
        async fn fetch_page(&self, page: u32) -> Result<MediaPage> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing {
                return Err(Error::Api { status: 500 });
            }
            let raw = self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_else(|| json!({}));
            Ok(serde_json::from_value(raw)?)
        }

        async fn resolve_source_url(&self, id: &str) -> Result<Option<String>> {
            if self.error_ids.iter().any(|n| n == id) {
                return Err(Error::Api { status: 500 });
            }
            if self.no_url_ids.iter().any(|n| n == id) {
                return Ok(None);
            }
            Ok(Some(format!("https://cdn.example.test/{id}/source.bin")))
        }
    }

    fn page(ids: &[&str], total_pages: u32) -> serde_json::Value {
        let media: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({"id": id, "filename": format!("{id}.MP4"),
                       "file_extension": "MP4", "file_size": 10, "type": "Video"})
            })
            .collect();
        json!({"_embedded": {"media": media}, "_pages": {"total_pages": total_pages}})
    }

    #[tokio::test]
    async fn lister_walks_every_page_once() {
        let api = Arc::new(MockMediaApi::new(vec![
            page(&["a", "b"], 3),
            page(&["c"], 3),
            page(&["d", "e"], 3),
        ]));
        let lister = MediaLister::new(Arc::clone(&api) as Arc<dyn MediaApi>, Arc::new(NoStatus));

        let items = lister.list_all().await.unwrap();
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c", "d", "e"]
        );
    }

    #[tokio::test]
    async fn lister_defaults_to_a_single_page() {
        let api = Arc::new(MockMediaApi::new(vec![json!({
            "_embedded": {"media": [{"id": "a", "filename": "a.MP4", "file_extension": "MP4"}]}
        })]));
        let lister = MediaLister::new(Arc::clone(&api) as Arc<dyn MediaApi>, Arc::new(NoStatus));

        let items = lister.list_all().await.unwrap();
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn page_without_items_contributes_nothing_but_continues() {
        let api = Arc::new(MockMediaApi::new(vec![
            page(&["a"], 3),
            json!({"_pages": {"total_pages": 3}}),
            page(&["b"], 3),
        ]));
        let lister = MediaLister::new(Arc::clone(&api) as Arc<dyn MediaApi>, Arc::new(NoStatus));

        let items = lister.list_all().await.unwrap();
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn source_variation_wins_over_others() {
        let variations: DownloadVariations = serde_json::from_value(json!({
            "_embedded": {"variations": [
                {"label": "low_res", "url": "https://cdn.example.test/low"},
                {"label": "source", "url": "https://cdn.example.test/full"},
            ]}
        }))
        .unwrap();
        assert_eq!(
            variations.source_url().as_deref(),
            Some("https://cdn.example.test/full")
        );
    }

    #[test]
    fn missing_source_variation_is_none() {
        let none: DownloadVariations = serde_json::from_value(json!({
            "_embedded": {"variations": [{"label": "low_res", "url": "x"}]}
        }))
        .unwrap();
        assert!(none.source_url().is_none());

        let empty: DownloadVariations = serde_json::from_value(json!({})).unwrap();
        assert!(empty.source_url().is_none());
    }
}
