//! Change notifications for credential slots.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Capacity of the per-backend change channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one execution context (a process, a window, a handle) that
/// writes to a shared backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a new, process-unique context id.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Id used for changes whose writer is unknown (another process).
    pub const fn external() -> Self {
        Self(0)
    }
}

/// A change to a slot, as seen by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange {
    /// The slot now holds `value`.
    Updated { key: String, value: String },
    /// The slot was cleared.
    Removed { key: String },
    /// Notifications were lost; re-read any slot you care about.
    Resync,
}

impl StorageChange {
    /// The key this change refers to, if it is tied to one.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Updated { key, .. } | Self::Removed { key } => Some(key),
            Self::Resync => None,
        }
    }
}

/// A change tagged with the context that made it.
#[derive(Debug, Clone)]
pub(crate) struct StorageEvent {
    pub(crate) origin: ContextId,
    pub(crate) change: StorageChange,
}

/// Receives changes made to a backend by other contexts.
pub struct StorageWatcher {
    origin: ContextId,
    rx: broadcast::Receiver<StorageEvent>,
}

impl StorageWatcher {
    pub(crate) fn new(origin: ContextId, rx: broadcast::Receiver<StorageEvent>) -> Self {
        Self { origin, rx }
    }

    /// Wait for the next foreign change.
    ///
    /// Returns `None` once the backend is gone.
    pub async fn changed(&mut self) -> Option<StorageChange> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(event.change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Credential watcher lagged behind, requesting resync");
                    return Some(StorageChange::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
