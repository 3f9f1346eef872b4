//! CLI command implementations.

mod api;
mod auth;
mod watch;

pub use api::get;
pub use auth::{login, logout, status};
pub use watch::watch;

use anyhow::{Context, Result};
use credential_store::FileCredentialStore;
use session_coordinator::{ApiClient, CoordinatorConfig, HttpAuthTransport, SessionCoordinator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Default location of the persisted refresh token.
pub fn default_credentials_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine the config directory")?;
    Ok(config_dir.join("cashflow").join("credentials.json"))
}

/// Everything a command needs to talk to the API.
pub struct Session {
    pub coordinator: SessionCoordinator,
    pub client: ApiClient,
}

impl Session {
    /// Build a coordinator over the file store at `credentials`.
    ///
    /// The session is not restored yet; commands decide whether they need it.
    pub fn open(api_url: Option<&str>, credentials: &Path) -> Result<Self> {
        let mut config = CoordinatorConfig::from_env()?;
        if let Some(api_url) = api_url {
            config.api_base_url = CoordinatorConfig::new(api_url)?.api_base_url;
        }
        debug!(api_url = %config.api_base_url, credentials = %credentials.display(), "Opening session");

        let store = FileCredentialStore::new(credentials)
            .with_context(|| format!("Failed to open {}", credentials.display()))?;
        let transport = HttpAuthTransport::new(config.clone())?;
        let coordinator = SessionCoordinator::new(Arc::new(transport), Arc::new(store), config);
        let client = ApiClient::new(coordinator.clone())?;

        Ok(Self {
            coordinator,
            client,
        })
    }
}
