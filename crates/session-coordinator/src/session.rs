//! Session data exchanged with the auth endpoints.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::AuthState;

/// Identity record of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Role name used by the dashboard to gate views.
    #[serde(default)]
    pub role: String,
}

/// Response of `/auth/login` and `/auth/refresh`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: u64,
    pub user: UserIdentity,
}

impl TokenGrant {
    /// Absolute expiry of the access token, counted from `issued_at`.
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        let seconds = i64::try_from(self.expires_in_seconds).unwrap_or(i64::MAX);
        Duration::try_seconds(seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// Tokens stay out of Debug output so they never reach the logs.
impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("user", &self.user)
            .finish()
    }
}

/// `/auth/login` request body.
#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub(crate) email: &'a str,
    pub(crate) password: &'a str,
}

/// `/auth/refresh` and `/auth/logout` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshTokenRequest<'a> {
    pub(crate) refresh_token: &'a str,
}

/// Point-in-time view of the coordinator, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: AuthState,
    pub user: Option<UserIdentity>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_in_flight: bool,
    pub proactive_refresh_armed: bool,
}

/// Why a session ended without the user asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    /// Explicit logout in this context.
    Logout,
    /// A refresh (reactive, proactive or at startup) failed.
    SessionExpired,
    /// Another context cleared the persisted refresh token.
    LoggedOutElsewhere,
}

/// Payload delivered to the event callback on every state change.
///
/// A `reason` is present exactly when the session ended; consumers use it to
/// navigate to the unauthenticated view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub state: AuthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SignOutReason>,
}
