// # Live-Update Broadcaster
//
// Fans the post-cycle device list out to push subscribers (UI clients).
//
// ## Semantics
//
// - Best effort, state not log: each observer holds only the newest
//   snapshot. An observer that falls behind skips straight to the latest.
// - Observers whose receiving side is gone are pruned on the next send.
// - Sending never blocks the engine.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::model::LiveSnapshot;

/// Stream of snapshots handed to one observer
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Arc<LiveSnapshot>> + Send>>;

type Slot = watch::Sender<Option<Arc<LiveSnapshot>>>;

/// Push channel to live observers
#[derive(Debug, Default)]
pub struct LiveBroadcaster {
    subscribers: Mutex<Vec<Slot>>,
}

impl LiveBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer. It receives snapshots sent after this call.
    pub fn subscribe(&self) -> SnapshotStream {
        let (tx, rx) = watch::channel(None);
        self.lock().push(tx);
        Box::pin(WatchStream::from_changes(rx).filter_map(|snapshot| snapshot))
    }

    /// Push `snapshot` to every live observer. Returns how many received it.
    pub fn broadcast(&self, snapshot: LiveSnapshot) -> usize {
        let snapshot = Arc::new(snapshot);
        let mut subscribers = self.lock();
        let before = subscribers.len();

        subscribers.retain(|tx| tx.send(Some(Arc::clone(&snapshot))).is_ok());

        let pruned = before - subscribers.len();
        if pruned > 0 {
            debug!("Pruned {} disconnected observers", pruned);
        }
        subscribers.len()
    }

    /// Registered observers, including ones not yet pruned
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        // A poisoned list of senders is still a valid list of senders
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner())
    }
}
