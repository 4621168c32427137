//! Transfer subsystem: starts downloads and answers progress/history queries.
//!
//! The host keeps every transfer it has driven in an in-memory registry.
//! The registry doubles as the download history that the existence prober
//! searches, and completed entries are never evicted, so polling a handle
//! that the registry no longer knows can only happen with a foreign host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::config::ConflictPolicy;
use crate::error::{Error, Result};

/// Identifier of one transfer within a host.
pub type TransferId = u64;

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    InProgress,
    Complete,
    Interrupted,
}

/// Point-in-time view of a transfer.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub state: TransferState,
    /// Bytes written so far.
    pub bytes_received: u64,
    /// Expected total, 0 when the origin did not advertise a length.
    pub total_bytes: u64,
    /// Final on-disk size, set once the transfer completes.
    pub file_size: Option<u64>,
    /// Destination path relative to the host's download root.
    pub filename: String,
    /// Whether the destination file is currently present on disk.
    pub exists: bool,
}

/// Query against a host's transfer registry.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    /// Match a single transfer by id.
    pub id: Option<TransferId>,
    /// Regular expression matched against the relative destination path.
    /// Callers matching a literal path must escape it (see
    /// [`regex::escape`]).
    pub filename_regex: Option<String>,
    /// Require the destination file to be present (or absent) on disk.
    pub exists: Option<bool>,
}

/// Request to start one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Direct download URL.
    pub url: String,
    /// Destination path relative to the host's download root
    /// (`folder/filename`).
    pub filename: String,
    /// Collision handling at the destination path.
    pub conflict_policy: ConflictPolicy,
}

/// Collaborator that drives file transfers and answers queries about them.
#[async_trait]
pub trait TransferHost: Send + Sync {
    /// Starts a transfer and returns its handle. The transfer proceeds in
    /// the background; callers observe it through [`search`](Self::search).
    async fn start(&self, request: TransferRequest) -> Result<TransferId>;

    /// Returns snapshots of registry entries matching `filter`, ordered by
    /// id. An invalid `filename_regex` yields no matches.
    async fn search(&self, filter: &TransferFilter) -> Vec<TransferSnapshot>;
}

struct TransferEntry {
    state: TransferState,
    bytes_received: u64,
    total_bytes: u64,
    file_size: Option<u64>,
    filename: String,
    path: PathBuf,
}

impl TransferEntry {
    fn snapshot(&self, id: TransferId, exists: bool) -> TransferSnapshot {
        TransferSnapshot {
            id,
            state: self.state,
            bytes_received: self.bytes_received,
            total_bytes: self.total_bytes,
            file_size: self.file_size,
            filename: self.filename.clone(),
            exists,
        }
    }
}

/// `TransferHost` that streams HTTP downloads to disk.
pub struct HttpTransferHost {
    http: reqwest::Client,
    root: PathBuf,
    next_id: AtomicU64,
    registry: Arc<Mutex<HashMap<TransferId, TransferEntry>>>,
}

impl HttpTransferHost {
    /// Creates a host writing under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(root: PathBuf) -> Result<Self> {
        Ok(Self::with_client(crate::api::build_http_client()?, root))
    }

    /// Creates a host reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, root: PathBuf) -> Self {
        Self {
            http,
            root,
            next_id: AtomicU64::new(0),
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn run_transfer(
        http: reqwest::Client,
        url: String,
        path: PathBuf,
        id: TransferId,
        registry: Arc<Mutex<HashMap<TransferId, TransferEntry>>>,
    ) -> Result<u64> {
        let response = http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!(
                "origin answered {status} for {url}"
            )));
        }

        if let Some(total) = response.content_length() {
            if let Some(entry) = registry.lock().unwrap().get_mut(&id) {
                entry.total_bytes = total;
            }
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(entry) = registry.lock().unwrap().get_mut(&id) {
                entry.bytes_received = written;
            }
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl TransferHost for HttpTransferHost {
    async fn start(&self, request: TransferRequest) -> Result<TransferId> {
        let target = self.root.join(&request.filename);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = match request.conflict_policy {
            ConflictPolicy::Overwrite => target,
            ConflictPolicy::Uniquify => unique_path(target).await,
        };
        let relative = target
            .strip_prefix(&self.root)
            .map_or_else(|_| target.to_string_lossy().into_owned(), |p| {
                p.to_string_lossy().replace('\\', "/")
            });

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.registry.lock().unwrap().insert(
            id,
            TransferEntry {
                state: TransferState::InProgress,
                bytes_received: 0,
                total_bytes: 0,
                file_size: None,
                filename: relative,
                path: target.clone(),
            },
        );

        let http = self.http.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let result =
                Self::run_transfer(http, request.url, target, id, Arc::clone(&registry)).await;
            let mut registry = registry.lock().unwrap();
            if let Some(entry) = registry.get_mut(&id) {
                match result {
                    Ok(written) => {
                        entry.state = TransferState::Complete;
                        entry.bytes_received = written;
                        entry.file_size = Some(written);
                    }
                    Err(e) => {
                        log::warn!("transfer {id} interrupted: {e}");
                        entry.state = TransferState::Interrupted;
                    }
                }
            }
        });

        Ok(id)
    }

    async fn search(&self, filter: &TransferFilter) -> Vec<TransferSnapshot> {
        let regex = match filter.filename_regex.as_deref().map(Regex::new) {
            None => None,
            Some(Ok(re)) => Some(re),
            Some(Err(e)) => {
                log::warn!("invalid transfer filter regex: {e}");
                return Vec::new();
            }
        };

        let candidates: Vec<(TransferSnapshot, PathBuf)> = {
            let registry = self.registry.lock().unwrap();
            registry
                .iter()
                .filter(|(id, _)| filter.id.is_none_or(|want| want == **id))
                .filter(|(_, entry)| {
                    regex.as_ref().is_none_or(|re| re.is_match(&entry.filename))
                })
                .map(|(id, entry)| (entry.snapshot(*id, false), entry.path.clone()))
                .collect()
        };

        let mut results = Vec::with_capacity(candidates.len());
        for (mut snapshot, path) in candidates {
            snapshot.exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            if let Some(want) = filter.exists {
                if snapshot.exists != want {
                    continue;
                }
            }
            results.push(snapshot);
        }
        results.sort_by_key(|s| s.id);
        results
    }
}

/// Finds the first free `name (N).ext` variant of `path`.
async fn unique_path(path: PathBuf) -> PathBuf {
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return path;
    }
    let parent = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
    let stem = path
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    let mut n: u32 = 1;
    loop {
        let candidate = match &extension {
            Some(ext) => parent.join(format!("{stem} ({n}).{ext}")),
            None => parent.join(format!("{stem} ({n})")),
        };
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn host(root: &Path) -> HttpTransferHost {
        HttpTransferHost::with_client(reqwest::Client::new(), root.to_path_buf())
    }

    fn insert_entry(host: &HttpTransferHost, id: TransferId, filename: &str, state: TransferState) {
        let path = host.root.join(filename);
        host.registry.lock().unwrap().insert(
            id,
            TransferEntry {
                state,
                bytes_received: 0,
                total_bytes: 0,
                file_size: Some(0),
                filename: filename.to_string(),
                path,
            },
        );
    }

    #[tokio::test]
    async fn unique_path_leaves_free_names_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("GOPR0001.MP4");
        assert_eq!(unique_path(path.clone()).await, path);
    }

    #[tokio::test]
    async fn unique_path_counts_upward() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("GOPR0001.MP4"), b"x").unwrap();
        std::fs::write(dir.path().join("GOPR0001 (1).MP4"), b"x").unwrap();

        let candidate = unique_path(dir.path().join("GOPR0001.MP4")).await;
        assert_eq!(candidate, dir.path().join("GOPR0001 (2).MP4"));
    }

    #[tokio::test]
    async fn unique_path_without_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes"), b"x").unwrap();

        let candidate = unique_path(dir.path().join("notes")).await;
        assert_eq!(candidate, dir.path().join("notes (1)"));
    }

    #[tokio::test]
    async fn search_by_id_returns_single_entry() {
        let dir = TempDir::new().unwrap();
        let host = host(dir.path());
        insert_entry(&host, 1, "GoPro/a.MP4", TransferState::Complete);
        insert_entry(&host, 2, "GoPro/b.MP4", TransferState::InProgress);

        let filter = TransferFilter {
            id: Some(2),
            ..TransferFilter::default()
        };
        let results = host.search(&filter).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "GoPro/b.MP4");
        assert_eq!(results[0].state, TransferState::InProgress);
    }

    #[tokio::test]
    async fn search_matches_filename_regex_literally_when_escaped() {
        let dir = TempDir::new().unwrap();
        let host = host(dir.path());
        insert_entry(&host, 1, "my (trip)/GOPR+001.MP4", TransferState::Complete);
        insert_entry(&host, 2, "my trip/GOPR001.MP4", TransferState::Complete);

        let pattern = format!("{}/{}$", regex::escape("my (trip)"), regex::escape("GOPR+001.MP4"));
        let filter = TransferFilter {
            filename_regex: Some(pattern),
            ..TransferFilter::default()
        };
        let results = host.search(&filter).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "my (trip)/GOPR+001.MP4");
    }

    #[tokio::test]
    async fn search_with_invalid_regex_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let host = host(dir.path());
        insert_entry(&host, 1, "GoPro/a.MP4", TransferState::Complete);

        let filter = TransferFilter {
            filename_regex: Some("(unclosed".to_string()),
            ..TransferFilter::default()
        };
        assert!(host.search(&filter).await.is_empty());
    }

    #[tokio::test]
    async fn search_exists_filter_consults_disk() {
        let dir = TempDir::new().unwrap();
        let host = host(dir.path());
        std::fs::create_dir_all(dir.path().join("GoPro")).unwrap();
        std::fs::write(dir.path().join("GoPro/on-disk.MP4"), b"data").unwrap();
        insert_entry(&host, 1, "GoPro/on-disk.MP4", TransferState::Complete);
        insert_entry(&host, 2, "GoPro/gone.MP4", TransferState::Complete);

        let filter = TransferFilter {
            exists: Some(true),
            ..TransferFilter::default()
        };
        let results = host.search(&filter).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "GoPro/on-disk.MP4");
        assert!(results[0].exists);
    }

    #[tokio::test]
    async fn search_results_are_ordered_by_id() {
        let dir = TempDir::new().unwrap();
        let host = host(dir.path());
        insert_entry(&host, 3, "GoPro/c.MP4", TransferState::Complete);
        insert_entry(&host, 1, "GoPro/a.MP4", TransferState::Complete);
        insert_entry(&host, 2, "GoPro/b.MP4", TransferState::Complete);

        let ids: Vec<_> = host
            .search(&TransferFilter::default())
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
