//! Storage key constants.

/// Storage keys used by the session coordinator.
pub struct StorageKeys;

impl StorageKeys {
    /// Current refresh token. Absence means there is no session to restore.
    pub const REFRESH_TOKEN: &'static str = "cashflow.refresh_token";
}
