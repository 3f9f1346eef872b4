//! In-process credential backend.

use crate::watch::{StorageEvent, EVENT_CHANNEL_CAPACITY};
use crate::{ContextId, CredentialStore, StorageChange, StorageResult, StorageWatcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

struct SharedSlots {
    data: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

/// Credential slots kept in memory and shared between handles.
///
/// Every handle created through [`MemoryCredentialStore::attach`] acts as a
/// separate execution context over the same slots, so writes made by one
/// handle are reported to the watchers of the others.
#[derive(Clone)]
pub struct MemoryCredentialStore {
    shared: Arc<SharedSlots>,
    context: ContextId,
}

impl MemoryCredentialStore {
    /// Create an empty backend with a single handle.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(SharedSlots {
                data: Mutex::new(HashMap::new()),
                events,
            }),
            context: ContextId::next(),
        }
    }

    /// Create another handle over the same slots with its own context id.
    pub fn attach(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            context: ContextId::next(),
        }
    }

    /// Context id of this handle.
    pub fn context_id(&self) -> ContextId {
        self.context
    }

    fn publish(&self, change: StorageChange) {
        // No subscribers is fine.
        let _ = self.shared.events.send(StorageEvent {
            origin: self.context,
            change,
        });
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.shared
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.publish(StorageChange::Updated {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self
            .shared
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let removed = self
            .shared
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            self.publish(StorageChange::Removed {
                key: key.to_string(),
            });
        }
        Ok(removed)
    }

    fn watch(&self) -> Option<StorageWatcher> {
        Some(StorageWatcher::new(
            self.context,
            self.shared.events.subscribe(),
        ))
    }
}
