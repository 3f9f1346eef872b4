//! Long-running session watch.

use super::Session;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chrono::Local;
use session_coordinator::SessionEvent;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Keep the session alive and report every state change until it ends or
/// the user interrupts.
///
/// Proactive refreshes run in the background; a logout from another
/// `cashflow` process ends the watch.
pub async fn watch(session: &Session, format: OutputFormat) -> Result<()> {
    let ended = Arc::new(Notify::new());
    let signal = ended.clone();
    session
        .coordinator
        .set_event_callback(Box::new(move |event: SessionEvent| {
            print_event(&event, format);
            if event.reason.is_some() {
                signal.notify_one();
            }
        }));

    match session.coordinator.restore().await {
        Ok(true) => {}
        Ok(false) => {
            output::print_error("Not logged in. Run 'cashflow login' first", format);
            return Ok(());
        }
        Err(e) => {
            output::print_error(&format!("Could not restore session: {}", e), format);
            return Ok(());
        }
    }

    if !session.coordinator.watch_external_invalidation() {
        warn!("Credential store cannot be watched; logouts elsewhere will go unnoticed");
    }
    if format == OutputFormat::Text {
        println!("Watching session. Press Ctrl-C to stop.");
    }

    tokio::select! {
        _ = ended.notified() => {}
        interrupted = tokio::signal::ctrl_c() => interrupted?,
    }
    Ok(())
}

fn print_event(event: &SessionEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to encode session event"),
        },
        OutputFormat::Text => {
            let mut line = format!(
                "[{}] {:?}",
                Local::now().format("%H:%M:%S"),
                event.state
            );
            if let Some(user) = &event.user {
                line.push_str(&format!(" as {}", user.email));
            }
            if let Some(reason) = event.reason {
                line.push_str(&format!(" ({:?})", reason));
            }
            println!("{}", line);
        }
    }
}
