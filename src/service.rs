//! Command surface supervising download runs.
//!
//! The service owns exactly one orchestrator and accepts the commands a UI
//! layer issues: start, stop, and the summary import/export/clear
//! operations. There is deliberately no resumption across host restarts: a
//! run that was active when the process died is abandoned, and consumers
//! call `start` again.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::api::{HttpMediaApi, MediaApi};
use crate::config::RunConfig;
use crate::download::{Orchestrator, RunStatus};
use crate::error::{Error, Result};
use crate::events::StatusSink;
use crate::fs::{FileSystem, TokioFileSystem};
use crate::store::{JsonFileStore, StateStore, keys};
use crate::summary::{MergeOutcome, SummaryExport, SummaryStore};
use crate::transfer::{HttpTransferHost, TransferHost};

/// Supervises download runs and the summary ledger.
pub struct DownloaderService<F: FileSystem = TokioFileSystem> {
    orchestrator: Arc<Orchestrator<F>>,
    summary: Arc<AsyncMutex<SummaryStore>>,
    store: Arc<dyn StateStore>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DownloaderService<TokioFileSystem> {
    /// Creates a service over the real HTTP API, transfer host, and
    /// file-backed state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RunConfig, events: Arc<dyn StatusSink>) -> Result<Self> {
        let http = crate::api::build_http_client()?;
        let api = Arc::new(HttpMediaApi::with_client(http.clone(), &config));
        let host = Arc::new(HttpTransferHost::with_client(
            http,
            config.download_root.clone(),
        ));
        let store = Arc::new(JsonFileStore::open(config.state_file_path()));
        Ok(Self::with_parts(
            api,
            host,
            store,
            Arc::new(TokioFileSystem::new()),
            events,
            config,
        ))
    }
}

impl<F: FileSystem + 'static> DownloaderService<F> {
    /// Creates a service over explicit collaborators.
    ///
    /// A persisted `isDownloading=true` from a previous session is reset
    /// here: the interrupted run is abandoned, not resumed.
    #[must_use]
    pub fn with_parts(
        api: Arc<dyn MediaApi>,
        host: Arc<dyn TransferHost>,
        store: Arc<dyn StateStore>,
        fs: Arc<F>,
        events: Arc<dyn StatusSink>,
        config: RunConfig,
    ) -> Self {
        let stale = store
            .get(keys::IS_DOWNLOADING)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if stale {
            log::info!("abandoning download run left over from a previous session");
            store.set_soft(keys::IS_DOWNLOADING, Value::Bool(false));
        }

        let summary = Arc::new(AsyncMutex::new(SummaryStore::load(Arc::clone(&store))));
        let orchestrator = Arc::new(Orchestrator::new(
            api,
            host,
            Arc::clone(&store),
            Arc::clone(&summary),
            events,
            fs,
            config,
        ));

        Self {
            orchestrator,
            summary,
            store,
            handle: Mutex::new(None),
        }
    }

    /// Starts a run into `folder`, spawned onto the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if a run is still active;
    /// concurrent runs are rejected, never queued.
    pub fn start(&self, folder: &str) -> Result<()> {
        let mut handle = self.handle.lock().unwrap();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(Error::AlreadyRunning);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let folder = folder.to_string();
        *handle = Some(tokio::spawn(async move {
            // Run-level failures are surfaced through the status channel.
            let _ = orchestrator.run(&folder).await;
        }));
        Ok(())
    }

    /// Requests a stop of the active run, if any.
    pub fn stop(&self) {
        self.orchestrator.stop();
    }

    /// Waits for the spawned run task, if one exists, to finish.
    pub async fn wait(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Returns a snapshot of the current run state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.orchestrator.status()
    }

    /// Returns the last status line persisted by any run.
    #[must_use]
    pub fn last_status(&self) -> Option<String> {
        self.store
            .get(keys::LAST_STATUS)
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    /// Produces the summary export document for the UI to save as a file.
    pub async fn export_summary(&self) -> SummaryExport {
        self.summary.lock().await.export()
    }

    /// Merges a previously exported document into the local ledger.
    pub async fn import_summary(&self, document: SummaryExport) -> MergeOutcome {
        self.summary.lock().await.merge(document.files)
    }

    /// Empties the summary ledger. Irreversible; the UI must confirm
    /// destructive intent with the user before calling this.
    pub async fn clear_summary(&self) {
        self.summary.lock().await.clear();
    }
}
