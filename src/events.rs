//! Status notification channel.
//!
//! Delivery is best-effort by design: the consumer is an optional UI that
//! may or may not be listening, so every sender swallows delivery failures.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::store::{StateStore, keys};

/// Receiver of run status notifications.
///
/// Implement this trait to observe a run. All methods have default no-op
/// implementations for convenience.
pub trait StatusSink: Send + Sync {
    /// Called with a human-readable status line on every state transition.
    fn status(&self, _text: &str) {}

    /// Called once when a run finishes (normally or after a stop).
    fn complete(&self, _text: &str) {}

    /// Called when a run fails at the run level (listing fetch failure).
    fn error(&self, _text: &str) {}
}

/// A null sink that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStatus;

impl StatusSink for NoStatus {}

/// One delivered status notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Status(String),
    Complete(String),
    Error(String),
}

/// Sink that forwards events over an unbounded channel.
///
/// If the receiver has been dropped the events are discarded; a closed
/// channel never fails the run.
pub struct ChannelStatus {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelStatus {
    /// Creates a channel-backed sink and its receiving half.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelStatus {
    fn status(&self, text: &str) {
        let _ = self.tx.send(StatusEvent::Status(text.to_string()));
    }

    fn complete(&self, text: &str) {
        let _ = self.tx.send(StatusEvent::Complete(text.to_string()));
    }

    fn error(&self, text: &str) {
        let _ = self.tx.send(StatusEvent::Error(text.to_string()));
    }
}

/// Sink decorator that persists the latest status line before forwarding.
///
/// Keeping `lastStatus` in the store lets a consumer that attaches
/// mid-run (or after a host restart) show where the run left off.
pub struct PersistingSink {
    store: Arc<dyn StateStore>,
    inner: Arc<dyn StatusSink>,
}

impl PersistingSink {
    /// Wraps `inner`, mirroring every status line into `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, inner: Arc<dyn StatusSink>) -> Self {
        Self { store, inner }
    }
}

impl StatusSink for PersistingSink {
    fn status(&self, text: &str) {
        self.store
            .set_soft(keys::LAST_STATUS, serde_json::Value::String(text.to_string()));
        self.inner.status(text);
    }

    fn complete(&self, text: &str) {
        self.inner.complete(text);
        // Completion doubles as the final status line
        self.status(text);
    }

    fn error(&self, text: &str) {
        self.inner.error(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn no_status_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoStatus>();
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelStatus::new();
        sink.status("one");
        sink.error("boom");
        sink.complete("done");

        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Status("one".into()));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Error("boom".into()));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Complete("done".into()));
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelStatus::new();
        drop(rx);
        // Nobody listening: events vanish without error
        sink.status("into the void");
        sink.complete("still fine");
    }

    #[test]
    fn persisting_sink_records_last_status() {
        let store = Arc::new(MemoryStore::new());
        let (inner, mut rx) = ChannelStatus::new();
        let sink = PersistingSink::new(store.clone(), Arc::new(inner));

        sink.status("fetching");
        assert_eq!(store.get(keys::LAST_STATUS), Some(json!("fetching")));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Status("fetching".into()));

        sink.complete("all done");
        assert_eq!(store.get(keys::LAST_STATUS), Some(json!("all done")));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Complete("all done".into()));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Status("all done".into()));
    }

    #[test]
    fn persisting_sink_does_not_persist_errors() {
        let store = Arc::new(MemoryStore::new());
        let sink = PersistingSink::new(store.clone(), Arc::new(NoStatus));
        sink.error("run-level failure");
        assert_eq!(store.get(keys::LAST_STATUS), None);
    }
}
