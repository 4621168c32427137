//! Existence prober: fallback check for files the summary does not know.

use std::path::PathBuf;
use std::sync::Arc;

use crate::fs::FileSystem;
use crate::transfer::{TransferFilter, TransferHost};

/// A file found by the prober.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingFile {
    /// Path relative to the download root (`folder/filename`).
    pub path: String,
    /// Size on disk, in bytes.
    pub byte_size: u64,
}

/// Probes the transfer host's history and the filesystem for an already
/// downloaded file.
///
/// Only consulted when the dedup summary has no entry for an item, keeping
/// the common case a single map lookup.
pub struct ExistenceProber<F: FileSystem> {
    host: Arc<dyn TransferHost>,
    fs: Arc<F>,
    root: PathBuf,
}

impl<F: FileSystem> ExistenceProber<F> {
    /// Creates a prober over `host`'s history and the filesystem under
    /// `root`.
    #[must_use]
    pub fn new(host: Arc<dyn TransferHost>, fs: Arc<F>, root: PathBuf) -> Self {
        Self { host, fs, root }
    }

    /// Looks for `folder/filename`, first in the host's download history,
    /// then directly on disk.
    ///
    /// The history query matches the path literally: both components are
    /// regex-escaped so metacharacters in user-chosen folder names or
    /// camera filenames cannot widen (or break) the match.
    pub async fn probe(&self, folder: &str, filename: &str) -> Option<ExistingFile> {
        let pattern = format!("{}/{}$", regex::escape(folder), regex::escape(filename));
        let filter = TransferFilter {
            filename_regex: Some(pattern),
            exists: Some(true),
            ..TransferFilter::default()
        };
        if let Some(hit) = self
            .host
            .search(&filter)
            .await
            .into_iter()
            .find(|s| s.file_size.is_some())
        {
            return Some(ExistingFile {
                path: hit.filename,
                byte_size: hit.file_size.unwrap_or(0),
            });
        }

        let path = self.root.join(folder).join(filename);
        let byte_size = self.fs.file_size(&path).await?;
        Some(ExistingFile {
            path: format!("{folder}/{filename}"),
            byte_size,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Result;
    use crate::transfer::{TransferRequest, TransferSnapshot, TransferState};
    use async_trait::async_trait;
    use regex::Regex;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// In-memory `FileSystem` recording writes, shared by tests across the
    /// crate.
    #[derive(Default)]
    pub(crate) struct MockFileSystem {
        /// path → size of pre-seeded files.
        pub(crate) files: Mutex<HashMap<PathBuf, u64>>,
        /// path → contents captured by `write`.
        pub(crate) writes: Mutex<HashMap<PathBuf, Vec<u8>>>,
    }

    impl MockFileSystem {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn add_file(&self, path: impl Into<PathBuf>, size: u64) {
            self.files.lock().unwrap().insert(path.into(), size);
        }
    }

    #[async_trait]
    impl FileSystem for MockFileSystem {
        async fn file_exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }

        async fn file_size(&self, path: &Path) -> Option<u64> {
            self.files.lock().unwrap().get(path).copied()
        }

        async fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }

        async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
            self.writes
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.to_vec());
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.len() as u64);
            Ok(())
        }

        async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
    }

    /// Host whose history is a fixed list of snapshots; `start` is
    /// unsupported.
    struct HistoryOnlyHost {
        history: Vec<TransferSnapshot>,
    }

    #[async_trait]
    impl TransferHost for HistoryOnlyHost {
        async fn start(&self, _request: TransferRequest) -> Result<crate::transfer::TransferId> {
            unimplemented!("prober tests never start transfers")
        }

        async fn search(&self, filter: &TransferFilter) -> Vec<TransferSnapshot> {
            let Some(pattern) = filter.filename_regex.as_deref() else {
                return self.history.clone();
            };
            let Ok(re) = Regex::new(pattern) else {
                return Vec::new();
            };
            self.history
                .iter()
                .filter(|s| re.is_match(&s.filename))
                .filter(|s| filter.exists.is_none_or(|want| s.exists == want))
                .cloned()
                .collect()
        }
    }

    fn history_entry(filename: &str, size: u64) -> TransferSnapshot {
        TransferSnapshot {
            id: 1,
            state: TransferState::Complete,
            bytes_received: size,
            total_bytes: size,
            file_size: Some(size),
            filename: filename.to_string(),
            exists: true,
        }
    }

    fn prober(history: Vec<TransferSnapshot>, fs: MockFileSystem) -> ExistenceProber<MockFileSystem> {
        ExistenceProber::new(
            Arc::new(HistoryOnlyHost { history }),
            Arc::new(fs),
            PathBuf::from("/downloads"),
        )
    }

    #[tokio::test]
    async fn finds_history_entry_by_exact_path() {
        let prober = prober(
            vec![history_entry("GoPro/GOPR0001.MP4", 4096)],
            MockFileSystem::new(),
        );
        let hit = prober.probe("GoPro", "GOPR0001.MP4").await.unwrap();
        assert_eq!(hit.path, "GoPro/GOPR0001.MP4");
        assert_eq!(hit.byte_size, 4096);
    }

    #[tokio::test]
    async fn metacharacters_match_literally() {
        // An unescaped pattern would read `(trip)` as a group and `R+` as a
        // quantifier, matching the decoy below instead of the literal path.
        let prober = prober(
            vec![
                history_entry("my trip/GOPRR001.MP4", 1),
                history_entry("my (trip)/GOPR+001.MP4", 2),
            ],
            MockFileSystem::new(),
        );
        let hit = prober.probe("my (trip)", "GOPR+001.MP4").await.unwrap();
        assert_eq!(hit.path, "my (trip)/GOPR+001.MP4");
        assert_eq!(hit.byte_size, 2);
    }

    #[tokio::test]
    async fn falls_back_to_filesystem() {
        let fs = MockFileSystem::new();
        fs.add_file("/downloads/GoPro/GOPR0002.MP4", 2048);
        let prober = prober(Vec::new(), fs);

        let hit = prober.probe("GoPro", "GOPR0002.MP4").await.unwrap();
        assert_eq!(hit.path, "GoPro/GOPR0002.MP4");
        assert_eq!(hit.byte_size, 2048);
    }

    #[tokio::test]
    async fn absent_everywhere_is_none() {
        let prober = prober(Vec::new(), MockFileSystem::new());
        assert!(prober.probe("GoPro", "GOPR0003.MP4").await.is_none());
    }
}
