//! hero-dl - A library for downloading a cloud media library to disk.
//!
//! This library enumerates a user's media library on the remote service,
//! downloads each item to a local folder one at a time, skips items already
//! retrieved, and tracks progress via a persisted summary ledger. It is
//! abstracted from any specific UI; consumers drive it through the
//! [`DownloaderService`] command surface and observe it through a
//! [`StatusSink`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hero_dl::{ChannelStatus, DownloaderService, RunConfig};
//!
//! # async fn example() -> hero_dl::Result<()> {
//! let config = RunConfig::new()
//!     .with_auth_token("bearer-token")
//!     .with_download_root("/home/me/Downloads");
//!
//! let (sink, mut events) = ChannelStatus::new();
//! let service = DownloaderService::new(config, Arc::new(sink))?;
//!
//! // Kick off a run into Downloads/GoPro; progress arrives on `events`.
//! service.start("GoPro")?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod format;
pub mod fs;
pub mod media;
pub mod poll;
pub mod probe;
pub mod service;
pub mod store;
pub mod summary;
pub mod transfer;

// Re-export main types for convenience
pub use api::{HttpMediaApi, MediaApi, MediaLister};
pub use config::{ConflictPolicy, RunConfig};
pub use download::{Orchestrator, RunPhase, RunStats, RunStatus, within_tolerance};
pub use error::{Error, Result};
pub use events::{ChannelStatus, NoStatus, StatusEvent, StatusSink};
pub use format::{format_bytes, format_mb};
pub use fs::{FileSystem, TokioFileSystem};
pub use media::{MediaItem, build_queue};
pub use poll::{ProgressPoller, TerminalState};
pub use probe::{ExistenceProber, ExistingFile};
pub use service::DownloaderService;
pub use store::{JsonFileStore, MemoryStore, StateStore};
pub use summary::{MergeOutcome, SummaryExport, SummaryRecord, SummaryStore};
pub use transfer::{
    HttpTransferHost, TransferFilter, TransferHost, TransferId, TransferRequest, TransferSnapshot,
    TransferState,
};
