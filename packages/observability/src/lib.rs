//! # Observability
//!
//! Shared tracing setup for the cashflow session binaries.
//!
//! Binaries call [`init`] or [`init_with_config`] once at startup and use the
//! standard `tracing` macros everywhere else. Library crates never install a
//! subscriber themselves.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "cashflow-cli".into(),
//!         default_level: "debug".into(),
//!         json: true,
//!         ..Default::default()
//!     })?;
//!
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```
//!
//! `RUST_LOG` overrides `default_level` when set.

mod json_layer;
mod writer;

pub use json_layer::JsonLayer;
pub use writer::AppendWriter;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the binary, written into every JSON line.
    pub service_name: String,

    /// Default filter (e.g. "info", "session_coordinator=debug").
    pub default_level: String,

    /// Emit JSON lines on stderr instead of the compact human format.
    pub json: bool,

    /// Also append JSON lines to this file.
    pub log_path: Option<PathBuf>,

    /// Keep logging to stderr when `log_path` is set.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            json: false,
            log_path: None,
            also_stderr: true,
        }
    }
}

impl LogConfig {
    fn stderr_enabled(&self) -> bool {
        self.log_path.is_none() || self.also_stderr
    }
}

/// Initialize logging to stderr with default settings.
///
/// Does nothing if a global subscriber is already installed.
pub fn init(service_name: &str) {
    let _ = init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Fails if the log file cannot be opened or a global subscriber is already
/// installed.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let file_layer = match &config.log_path {
        Some(path) => Some(JsonLayer::new(
            config.service_name.clone(),
            AppendWriter::open(path)?,
        )),
        None => None,
    };

    let stderr = config.stderr_enabled();
    let stderr_json =
        (stderr && config.json).then(|| JsonLayer::new(config.service_name.clone(), io::stderr));
    let stderr_compact = (stderr && !config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
    });

    tracing_subscriber::registry()
        .with(build_filter(&config.default_level))
        .with(file_layer)
        .with(stderr_json)
        .with(stderr_compact)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::debug!(
        service = %config.service_name,
        log_path = ?config.log_path,
        "observability initialized"
    );
    Ok(())
}

/// `RUST_LOG` if set and valid, `default_level` otherwise.
fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(!config.json);
        assert!(config.log_path.is_none());
        assert!(config.stderr_enabled());
    }

    #[test]
    fn test_stderr_follows_log_path() {
        let config = LogConfig {
            log_path: Some(PathBuf::from("/tmp/cashflow.jsonl")),
            also_stderr: false,
            ..Default::default()
        };
        assert!(!config.stderr_enabled());

        let config = LogConfig {
            also_stderr: false,
            ..Default::default()
        };
        assert!(config.stderr_enabled());
    }
}
