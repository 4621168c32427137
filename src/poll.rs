//! Transfer progress polling.

use std::time::Duration;

use crate::format::format_mb;
use crate::transfer::{TransferFilter, TransferHost, TransferId, TransferState};

/// How a polled transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Complete,
    Interrupted,
}

/// Polls an in-flight transfer until it reaches a terminal state.
#[derive(Debug, Clone, Copy)]
pub struct ProgressPoller {
    interval: Duration,
}

impl ProgressPoller {
    /// Creates a poller with the given poll interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Waits for the transfer to finish, emitting a status line through
    /// `notify` whenever the reported percentage advances by at least five
    /// points or reaches 100.
    ///
    /// A handle the host no longer knows is treated as complete. That
    /// conflates "finished and rotated out of history" with "never
    /// started"; the bundled [`HttpTransferHost`](crate::HttpTransferHost)
    /// retains completed entries, so the assumption only matters for
    /// foreign hosts.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub async fn await_completion<N>(
        &self,
        host: &dyn TransferHost,
        id: TransferId,
        name: &str,
        prefix: &str,
        notify: N,
    ) -> TerminalState
    where
        N: Fn(&str) + Send + Sync,
    {
        let filter = TransferFilter {
            id: Some(id),
            ..TransferFilter::default()
        };
        let mut last_percent: i64 = 0;

        loop {
            tokio::time::sleep(self.interval).await;

            let results = host.search(&filter).await;
            let Some(snapshot) = results.first() else {
                log::debug!("transfer {id} vanished from the registry, assuming complete");
                return TerminalState::Complete;
            };

            match snapshot.state {
                TransferState::Complete => return TerminalState::Complete,
                TransferState::Interrupted => {
                    notify(&format!("❌ Download interrupted: {name}"));
                    return TerminalState::Interrupted;
                }
                TransferState::InProgress => {
                    let percent = if snapshot.total_bytes > 0 {
                        ((snapshot.bytes_received as f64 / snapshot.total_bytes as f64) * 100.0)
                            .round() as i64
                    } else {
                        0
                    };
                    if percent - last_percent >= 5 || percent == 100 {
                        last_percent = percent;
                        notify(&format!(
                            "{prefix} {name} - {percent}% ({}/{} MB)",
                            format_mb(snapshot.bytes_received),
                            format_mb(snapshot.total_bytes)
                        ));
                    }
                }
            }
        }
    }
}
