//! Coordinator configuration.

use crate::{AuthError, AuthResult};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";

/// Renew this long before the access token expires.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(120);

/// Never arm the proactive timer for less than this.
pub const DEFAULT_MIN_PROACTIVE_DELAY: Duration = Duration::from_secs(5);

/// Timeout applied to every auth call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Session coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base URL of the cashflow API; auth endpoints live under `auth/`.
    pub api_base_url: Url,

    /// How long before expiry the proactive refresh fires.
    pub refresh_buffer: Duration,

    /// Lower bound for the proactive timer, so short-lived tokens cannot
    /// cause back-to-back refreshes.
    pub min_proactive_delay: Duration,

    /// Timeout for login, refresh and logout calls. A refresh that times
    /// out is treated as a failed refresh.
    pub request_timeout: Duration,
}

impl CoordinatorConfig {
    /// Create a configuration for the given API base URL with default timings.
    pub fn new(api_base_url: &str) -> AuthResult<Self> {
        Ok(Self {
            api_base_url: parse_base_url(api_base_url)?,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            min_proactive_delay: DEFAULT_MIN_PROACTIVE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Build a configuration from environment variables.
    ///
    /// - `CASHFLOW_API_URL` (default `http://127.0.0.1:8080/api`)
    /// - `CASHFLOW_REFRESH_BUFFER_SECS` (default 120)
    /// - `CASHFLOW_HTTP_TIMEOUT_SECS` (default 30)
    pub fn from_env() -> AuthResult<Self> {
        let api_url = std::env::var("CASHFLOW_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let refresh_buffer_secs = read_secs("CASHFLOW_REFRESH_BUFFER_SECS")?
            .unwrap_or(DEFAULT_REFRESH_BUFFER.as_secs());
        let timeout_secs =
            read_secs("CASHFLOW_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT.as_secs());

        Ok(Self {
            api_base_url: parse_base_url(&api_url)?,
            refresh_buffer: Duration::from_secs(refresh_buffer_secs),
            min_proactive_delay: DEFAULT_MIN_PROACTIVE_DELAY,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Delay before the proactive refresh for a token living `expires_in_seconds`.
    pub fn proactive_delay(&self, expires_in_seconds: u64) -> Duration {
        Duration::from_secs(expires_in_seconds)
            .saturating_sub(self.refresh_buffer)
            .max(self.min_proactive_delay)
    }

    /// Resolve an API path such as `auth/login` or `/transactions` against the base URL.
    pub fn endpoint(&self, path: &str) -> AuthResult<Url> {
        Ok(self.api_base_url.join(path.trim_start_matches('/'))?)
    }
}

/// Parse a base URL, making sure it ends in `/` so `join` appends instead of
/// replacing the last segment.
fn parse_base_url(raw: &str) -> AuthResult<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash)?;
    if url.cannot_be_a_base() {
        return Err(AuthError::Config(format!(
            "API URL cannot be used as a base: {}",
            raw
        )));
    }
    Ok(url)
}

fn read_secs(name: &str) -> AuthResult<Option<u64>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AuthError::Config(format!("{} must be a number of seconds", name))),
        _ => Ok(None),
    }
}
