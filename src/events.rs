//! Progress event stream consumed by the surrounding application.
//!
//! The core only exposes the ability to subscribe; rendering the
//! stream as a progress bar, log panel, or socket broadcast is the
//! caller's responsibility. Events are fire-and-forget: a slow or
//! absent subscriber never blocks the pipeline.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::Config;

/// Final counters for a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub pages_captured: usize,
    pub pages_failed: usize,
    pub assets_downloaded: usize,
    pub assets_failed: usize,
    pub bytes_written: u64,
    pub elements_removed: usize,
    pub duration_secs: u64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pages ({} failed), {} assets ({} failed), {} bytes, {} elements removed, {}s",
            self.pages_captured,
            self.pages_failed,
            self.assets_downloaded,
            self.assets_failed,
            self.bytes_written,
            self.elements_removed,
            self.duration_secs
        )
    }
}

/// Discrete lifecycle notifications emitted while a run progresses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PageDiscovered { url: String, depth: u32 },
    PageFetched { url: String, ok: bool, reason: Option<String> },
    AssetDownloaded { url: String, bytes: u64 },
    PageRewritten { url: String },
    PageSanitized { url: String, removed: usize },
    RunCompleted { stats: RunStats },
    RunFailed { reason: String },
}

/// Broadcast-backed event bus. Cloning is cheap; every stage of the
/// pipeline holds one.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(Config::EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        // Send fails when nobody is listening; that is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
