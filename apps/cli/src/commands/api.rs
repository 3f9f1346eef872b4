//! Authenticated API calls.

use super::Session;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde_json::Value;
use session_coordinator::AuthError;

/// `GET` an API path and print the JSON response.
pub async fn get(session: &Session, path: &str, format: OutputFormat) -> Result<()> {
    match session.coordinator.restore().await {
        Ok(true) => {}
        Ok(false) => {
            output::print_error("Not logged in. Run 'cashflow login' first", format);
            return Ok(());
        }
        Err(e) if e.requires_login() => {
            output::print_error("Session expired. Run 'cashflow login' again", format);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    match session.client.get_json::<Value>(path).await {
        Ok(body) => output::print_json(&body),
        Err(AuthError::Forbidden) => {
            output::print_error("Your role does not allow this request", format);
            Ok(())
        }
        Err(e) if e.requires_login() => {
            output::print_error("Session expired. Run 'cashflow login' again", format);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
