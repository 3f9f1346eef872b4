//! Storage trait definitions.

use crate::{StorageResult, StorageWatcher};

/// Trait for durable credential backends.
///
/// Implementations hold a small set of named string slots. The session
/// coordinator only ever uses one of them (the refresh token), but the trait
/// stays key-based so several applications can share one backend.
pub trait CredentialStore: Send + Sync {
    /// Store a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether anything was removed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Subscribe to changes made by other execution contexts.
    ///
    /// Changes made through this handle are never reported back to it.
    /// Returns `None` when the backend cannot observe foreign writes.
    fn watch(&self) -> Option<StorageWatcher> {
        None
    }
}
