//! The download orchestrator: the run state machine at the core of the
//! crate.
//!
//! One run walks `Idle → Listing → Downloading → Completing → Idle`,
//! driving exactly one transfer at a time. Per-item failures are isolated;
//! only the initial listing fetch can fail the run as a whole.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::api::{MediaApi, MediaLister};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::events::{PersistingSink, StatusSink};
use crate::format::{format_bytes, format_mb};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::media::{MediaItem, build_queue};
use crate::poll::{ProgressPoller, TerminalState};
use crate::probe::ExistenceProber;
use crate::store::{StateStore, keys};
use crate::summary::{SummaryRecord, SummaryStore};
use crate::transfer::{TransferHost, TransferRequest};

/// Phase of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Listing,
    Downloading,
    Completing,
}

/// Observable snapshot of the current run.
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub folder: String,
    /// Index of the next item to process; monotonically non-decreasing
    /// within a run.
    pub cursor: usize,
    pub queue_len: usize,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Items the cursor advanced past (includes skips and failures).
    pub files_processed: usize,
    /// Items transferred to completion this run.
    pub files_downloaded: usize,
    /// Items skipped by the dedup check.
    pub files_skipped: usize,
    /// Sum of `file_size` over the whole queue, skipped items included.
    /// This is what the completion notification reports: the slice of the
    /// library the run covered, not the bytes moved this time.
    pub queue_bytes: u64,
    /// Sum of `file_size` over items actually transferred this run.
    pub transferred_bytes: u64,
}

/// Checks whether two reported sizes agree within `tolerance` bytes.
///
/// Metadata sizes and measured sizes skew by a few bytes, so equality is
/// too strict; a missing size on either side never matches.
#[must_use]
pub fn within_tolerance(expected: Option<u64>, actual: Option<u64>, tolerance: u64) -> bool {
    match (expected, actual) {
        (Some(expected), Some(actual)) => expected.abs_diff(actual) < tolerance,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Downloaded,
    Skipped,
    NoUrl,
    Interrupted,
    Failed,
}

struct RunState {
    phase: RunPhase,
    folder: String,
    cursor: usize,
    queue_len: usize,
    cancel: CancellationToken,
    /// Incremented per run so a superseded run cannot write back into
    /// shared state after a stop/start cycle.
    generation: u64,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            folder: String::new(),
            cursor: 0,
            queue_len: 0,
            cancel: CancellationToken::new(),
            generation: 0,
        }
    }
}

/// Owns the run state and sequences fetch–resolve–download–record–advance
/// for each queued item.
pub struct Orchestrator<F: FileSystem = TokioFileSystem> {
    api: Arc<dyn MediaApi>,
    host: Arc<dyn TransferHost>,
    store: Arc<dyn StateStore>,
    summary: Arc<AsyncMutex<SummaryStore>>,
    events: Arc<dyn StatusSink>,
    fs: Arc<F>,
    lister: MediaLister,
    prober: ExistenceProber<F>,
    poller: ProgressPoller,
    config: RunConfig,
    state: Arc<Mutex<RunState>>,
}

impl<F: FileSystem> Orchestrator<F> {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// Every status line is mirrored into the store's `lastStatus` key so
    /// consumers attaching mid-run can catch up.
    #[must_use]
    pub fn new(
        api: Arc<dyn MediaApi>,
        host: Arc<dyn TransferHost>,
        store: Arc<dyn StateStore>,
        summary: Arc<AsyncMutex<SummaryStore>>,
        events: Arc<dyn StatusSink>,
        fs: Arc<F>,
        config: RunConfig,
    ) -> Self {
        let events: Arc<dyn StatusSink> =
            Arc::new(PersistingSink::new(Arc::clone(&store), events));
        let lister = MediaLister::new(Arc::clone(&api), Arc::clone(&events));
        let prober = ExistenceProber::new(
            Arc::clone(&host),
            Arc::clone(&fs),
            config.download_root.clone(),
        );
        let poller = ProgressPoller::new(config.poll_interval());
        Self {
            api,
            host,
            store,
            summary,
            events,
            fs,
            lister,
            prober,
            poller,
            config,
            state: Arc::new(Mutex::new(RunState::new())),
        }
    }

    /// Returns a snapshot of the current run state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        let state = self.state.lock().unwrap();
        RunStatus {
            phase: state.phase,
            folder: state.folder.clone(),
            cursor: state.cursor,
            queue_len: state.queue_len,
        }
    }

    /// Requests a stop. The queue and cursor are cleared immediately;
    /// in-flight network calls are not aborted, but their continuations
    /// observe the cleared state and no-op.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.cancel.cancel();
            state.queue_len = 0;
            state.cursor = 0;
            state.phase = RunPhase::Idle;
        }
        self.store
            .set_soft(keys::IS_DOWNLOADING, Value::Bool(false));
        log::debug!("stop requested, queue cleared");
    }

    /// Executes one full run: list, filter, then drain the queue one item
    /// at a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if a run is active, or the
    /// listing failure that aborted the run. Per-item failures never
    /// surface here; they are reported through the status channel and the
    /// cursor advances past them.
    pub async fn run(&self, folder: &str) -> Result<RunStats> {
        let (cancel, generation) = {
            let mut state = self.state.lock().unwrap();
            if state.phase != RunPhase::Idle {
                return Err(Error::AlreadyRunning);
            }
            state.phase = RunPhase::Listing;
            state.folder = folder.to_string();
            state.cursor = 0;
            state.queue_len = 0;
            state.cancel = CancellationToken::new();
            state.generation += 1;
            (state.cancel.clone(), state.generation)
        };

        self.store
            .set_soft(keys::IS_DOWNLOADING, Value::Bool(true));
        self.store
            .set_soft(keys::DOWNLOAD_FOLDER, Value::String(folder.to_string()));
        self.events.status("🔍 Fetching media list...");

        let all = match self.lister.list_all().await {
            Ok(all) => all,
            Err(e) => {
                log::error!("listing fetch failed: {e}");
                self.events.error(&format!("Failed to fetch media: {e}"));
                self.store
                    .set_soft(keys::IS_DOWNLOADING, Value::Bool(false));
                self.finish_run(generation);
                return Err(e);
            }
        };

        // A stop during the listing leaves the run abandoned: observe the
        // cleared state instead of repopulating the queue.
        let queue = if cancel.is_cancelled() {
            Vec::new()
        } else {
            self.events.status(&format!("✓ Found {} items", all.len()));
            let queue = build_queue(all);
            {
                let mut state = self.state.lock().unwrap();
                if state.generation == generation && !state.cancel.is_cancelled() {
                    state.phase = RunPhase::Downloading;
                    state.queue_len = queue.len();
                }
            }
            self.events
                .status(&format!("📥 Starting download of {} files...", queue.len()));
            queue
        };

        let mut stats = RunStats {
            queue_bytes: queue.iter().filter_map(|i| i.file_size).sum(),
            ..RunStats::default()
        };

        let mut cursor = 0;
        while cursor < queue.len() && !cancel.is_cancelled() {
            let item = &queue[cursor];
            let prefix = format!("[{}/{}]", cursor + 1, queue.len());
            let remaining = queue.len() - cursor;

            let outcome = match self.process_item(item, folder, &prefix, remaining).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("error downloading {}: {e}", item.display_name());
                    self.events
                        .status(&format!("❌ Error downloading {}: {e}", item.display_name()));
                    ItemOutcome::Failed
                }
            };

            cursor += 1;
            {
                let mut state = self.state.lock().unwrap();
                if state.generation == generation && !state.cancel.is_cancelled() {
                    state.cursor = cursor;
                }
            }

            match outcome {
                ItemOutcome::Downloaded => {
                    stats.files_downloaded += 1;
                    stats.transferred_bytes += item.file_size.unwrap_or(0);
                }
                ItemOutcome::Skipped => stats.files_skipped += 1,
                ItemOutcome::NoUrl | ItemOutcome::Interrupted | ItemOutcome::Failed => {}
            }

            let delay = match outcome {
                ItemOutcome::Skipped => self.config.skip_delay(),
                ItemOutcome::NoUrl => Duration::ZERO,
                ItemOutcome::Downloaded | ItemOutcome::Interrupted | ItemOutcome::Failed => {
                    self.config.item_delay()
                }
            };
            if !delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.generation == generation && !state.cancel.is_cancelled() {
                state.phase = RunPhase::Completing;
            }
        }

        // After a stop the queue and cursor were cleared; the completion
        // notification reflects that empty state.
        let stopped = cancel.is_cancelled();
        let (count, total_bytes) = if stopped { (0, 0) } else { (cursor, stats.queue_bytes) };
        stats.files_processed = count;

        self.store
            .set_soft(keys::IS_DOWNLOADING, Value::Bool(false));
        let destination = self.config.download_root.join(folder);
        self.events.complete(&format!(
            "✅ Download complete! {count} files ({} MB) downloaded to {}",
            format_mb(total_bytes),
            destination.display()
        ));
        log::info!("run finished: {count} files, {}", format_bytes(total_bytes));

        self.finish_run(generation);
        Ok(stats)
    }

    fn finish_run(&self, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if state.generation == generation {
            state.phase = RunPhase::Idle;
            state.queue_len = 0;
            state.cursor = 0;
        }
    }

    async fn process_item(
        &self,
        item: &MediaItem,
        folder: &str,
        prefix: &str,
        remaining: usize,
    ) -> Result<ItemOutcome> {
        let name = item.display_name();
        let size_mb = item.file_size.map_or_else(|| "?".to_string(), format_mb);
        let estimate = estimate_minutes(remaining, self.config.item_delay());
        self.events.status(&format!(
            "{prefix} {name} ({size_mb} MB) - Est: {estimate}min remaining"
        ));

        // Resolve the direct URL first; an item without a source variation
        // is skipped, not failed.
        let Some(url) = self.api.resolve_source_url(&item.id).await? else {
            log::debug!("no download URL for {name}");
            self.events
                .status(&format!("⚠️ No download URL for {name}, skipping..."));
            return Ok(ItemOutcome::NoUrl);
        };

        // Dedup: the summary is authoritative, the existence probe is the
        // fallback for files downloaded before the ledger knew them.
        let recorded = { self.summary.lock().await.get(&item.id).cloned() };
        if let Some(record) = recorded {
            if within_tolerance(item.file_size, record.file_size, self.config.size_tolerance) {
                let recorded_mb = record.file_size.map_or_else(|| "?".to_string(), format_mb);
                self.events.status(&format!(
                    "{prefix} ⏭️ Skipping {name} (already downloaded, {recorded_mb} MB)"
                ));
                return Ok(ItemOutcome::Skipped);
            }
            log::debug!(
                "size mismatch for {name}: expected {:?}, recorded {:?}",
                item.file_size,
                record.file_size
            );
            self.events
                .status(&format!("{prefix} ⚠️ Re-downloading {name} (size mismatch)"));
        } else if let Some(existing) = self.prober.probe(folder, name).await {
            if within_tolerance(
                item.file_size,
                Some(existing.byte_size),
                self.config.size_tolerance,
            ) {
                {
                    let mut summary = self.summary.lock().await;
                    summary.put(SummaryRecord::from_probe(item, folder, existing.byte_size));
                    summary.save();
                }
                self.events.status(&format!(
                    "{prefix} ⏭️ Skipping {name} (already exists, {} MB)",
                    format_mb(existing.byte_size)
                ));
                return Ok(ItemOutcome::Skipped);
            }
            self.events
                .status(&format!("{prefix} ⚠️ Re-downloading {name} (size mismatch)"));
        }

        let id = self
            .host
            .start(TransferRequest {
                url,
                filename: format!("{folder}/{name}"),
                conflict_policy: self.config.conflict_policy,
            })
            .await?;
        log::debug!("transfer {id} started for {name}");

        let terminal = self
            .poller
            .await_completion(self.host.as_ref(), id, name, prefix, |text: &str| {
                self.events.status(text);
            })
            .await;
        if terminal == TerminalState::Interrupted {
            return Ok(ItemOutcome::Interrupted);
        }

        // The record carries the metadata size, not measured bytes, so
        // future tolerance checks compare like with like.
        {
            let mut summary = self.summary.lock().await;
            summary.put(SummaryRecord::from_item(item, folder));
            summary.save();
        }
        self.write_sidecar(item, folder).await?;

        Ok(ItemOutcome::Downloaded)
    }

    /// Writes the full item record next to the downloaded file as
    /// `<filename>.json`.
    async fn write_sidecar(&self, item: &MediaItem, folder: &str) -> Result<()> {
        let path = self
            .config
            .download_root
            .join(folder)
            .join(format!("{}.json", item.display_name()));
        if let Some(parent) = path.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(item)?;
        self.fs.write(&path, &body).await?;
        Ok(())
    }
}

/// Rough time remaining, assuming the inter-item delay dominates.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn estimate_minutes(remaining: usize, item_delay: Duration) -> u64 {
    ((remaining as f64 * item_delay.as_secs_f64()) / 60.0).round() as u64
}
