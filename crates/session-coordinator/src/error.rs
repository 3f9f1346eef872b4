//! Errors surfaced by the coordinator, its transport and the API client.

use thiserror::Error;

/// Every failure a caller of this crate can observe.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No session is held and none can be recovered
    #[error("Not authenticated")]
    Unauthenticated,

    /// A refresh was attempted and failed; the session has been torn down
    #[error("Session expired")]
    SessionExpired,

    /// The server throttled the request
    #[error("Too many requests, try again later")]
    RateLimited,

    /// Authenticated, but the role does not allow this operation
    #[error("Forbidden")]
    Forbidden,

    /// Login rejected the email/password pair
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The account exists but has been deactivated
    #[error("Account is disabled")]
    AccountDisabled,

    /// Any other non-success response from the API
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The session FSM refused an input
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// The credential store failed
    #[error("Storage error: {0}")]
    Storage(#[from] credential_store::StorageError),

    /// Transport failure (connect, TLS, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A body could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An endpoint did not resolve against the base URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An auth or API call exceeded `request_timeout`
    #[error("Operation timed out")]
    Timeout,

    /// Invalid environment or CLI configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried
    /// by the user.
    ///
    /// The coordinator itself never retries a failed refresh; this is only a
    /// hint for callers deciding what to show.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Timeout | AuthError::RateLimited => true,
            AuthError::Api { status, .. } => *status >= 500,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Returns true if the error means the user has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, AuthError::Unauthenticated | AuthError::SessionExpired)
    }
}

/// Result alias used across the crate.
pub type AuthResult<T> = Result<T, AuthError>;
