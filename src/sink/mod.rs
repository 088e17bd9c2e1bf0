//! Outbound side of the driver
//!
//! Sinks receive every snapshot the driver builds. The watch-channel sink is
//! the hand-off point to async consumers such as the status panel and the
//! MQTT publisher.

pub mod mqtt;
pub mod panel;

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

use crate::snapshot::Snapshot;
use crate::xr::types::SessionPhase;

/// Receiver of per-tick snapshots
pub trait SnapshotSink: Send {
    fn publish(&mut self, snapshot: &Snapshot);

    fn name(&self) -> &'static str;
}

/// Publishes each snapshot as a full replacement into a watch channel
pub struct WatchSink {
    sender: watch::Sender<Snapshot>,
}

impl WatchSink {
    pub fn channel() -> (Self, watch::Receiver<Snapshot>) {
        let (sender, receiver) = watch::channel(Snapshot::metadata_only(0, SessionPhase::Unknown));
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.sender.subscribe()
    }
}

impl SnapshotSink for WatchSink {
    fn publish(&mut self, snapshot: &Snapshot) {
        // send_replace keeps working when every receiver is gone
        self.sender.send_replace(snapshot.clone());
        debug!(
            "Published frame {} with {} entries",
            snapshot.frame,
            snapshot.len()
        );
    }

    fn name(&self) -> &'static str {
        "watch"
    }
}

/// Keeps every published snapshot in memory
#[derive(Clone, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<Snapshot>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshots().pop()
    }
}

impl SnapshotSink for MemorySink {
    fn publish(&mut self, snapshot: &Snapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(snapshot.clone());
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
