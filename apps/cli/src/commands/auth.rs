//! Authentication commands.

use super::Session;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use session_coordinator::{AuthError, SessionSnapshot};
use std::io::{self, Write};
use tracing::debug;

/// Login with email and password.
pub async fn login(session: &Session, email: Option<String>, format: OutputFormat) -> Result<()> {
    if let Ok(true) = session.coordinator.restore().await {
        if let Some(user) = session.coordinator.current_user() {
            output::print_success(&format!("Already logged in as {}", user.email), format);
            return Ok(());
        }
    }

    let email = match email {
        Some(email) => email,
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut email = String::new();
            io::stdin().read_line(&mut email)?;
            email.trim().to_string()
        }
    };
    if email.is_empty() {
        output::print_error("Email is required", format);
        return Ok(());
    }

    // Prompt for password (hidden)
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(());
    }

    match session.coordinator.login(&email, &password).await {
        Ok(user) => {
            output::print_success(&format!("Logged in as {}", user.email), format);
            Ok(())
        }
        Err(AuthError::InvalidCredentials(_)) => {
            output::print_error("Login failed: invalid email or password", format);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Logout and clear the persisted session.
///
/// Revokes the persisted refresh token as-is; no refresh is needed first.
pub async fn logout(session: &Session, format: OutputFormat) -> Result<()> {
    session.coordinator.logout().await;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Check authentication status.
pub async fn status(session: &Session, format: OutputFormat) -> Result<()> {
    if let Err(e) = session.coordinator.restore().await {
        debug!(error = %e, "Session could not be restored");
    }
    print_status(&session.coordinator.snapshot(), format)
}

fn print_status(snapshot: &SessionSnapshot, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => output::print_json(snapshot),
        OutputFormat::Text => {
            match &snapshot.user {
                Some(user) if snapshot.state.is_authenticated() => {
                    output::print_row("Auth", "logged in");
                    output::print_row("User", &user.email);
                    if !user.role.is_empty() {
                        output::print_row("Role", &user.role);
                    }
                    if let Some(expires_at) = snapshot.expires_at {
                        output::print_row("Expires", &expires_at.to_rfc3339());
                    }
                }
                _ => output::print_row("Auth", "not logged in"),
            }
            Ok(())
        }
    }
}
