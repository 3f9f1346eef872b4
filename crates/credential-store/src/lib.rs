//! Durable credential storage for the cashflow session coordinator.
//!
//! This crate provides:
//! - A key/value [`CredentialStore`] trait over small string slots
//! - [`MemoryCredentialStore`] for tests and embedding, with attachable handles
//!   that behave like separate execution contexts over the same slots
//! - [`FileCredentialStore`] persisting slots to a private JSON file
//! - [`StorageWatcher`] delivering changes made by *other* contexts, which is
//!   how a logout in one place tears down sessions everywhere else

mod file;
mod keys;
mod memory;
mod traits;
mod watch;

pub use file::{FileCredentialStore, DEFAULT_DEBOUNCE};
pub use keys::StorageKeys;
pub use memory::MemoryCredentialStore;
pub use traits::CredentialStore;
pub use watch::{ContextId, StorageChange, StorageWatcher};

use thiserror::Error;

/// Failure reading or writing a credential backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing file path cannot be used
    #[error("Invalid credential path: {0}")]
    InvalidPath(String),

    /// The backing file exists but is not a valid slot map
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;
