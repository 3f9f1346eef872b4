//! Cashflow CLI - sign in to the cashflow dashboard API and call it.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::Session;
use std::path::PathBuf;

/// Cashflow CLI - manage your dashboard session from the terminal.
#[derive(Parser)]
#[command(name = "cashflow")]
#[command(about = "Cashflow CLI for authentication and API access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the cashflow API
    #[arg(long, env = "CASHFLOW_API_URL", global = true)]
    api_url: Option<String>,

    /// File holding the persisted refresh token
    #[arg(long, env = "CASHFLOW_CREDENTIALS", global = true)]
    credentials: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with email and password
    Login {
        /// Email address (prompted if omitted)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Logout and clear the persisted session
    Logout,

    /// Check authentication status
    Status,

    /// GET an API path with the current session
    Get {
        /// Path relative to the API base URL, e.g. /transactions
        path: String,
    },

    /// Keep the session alive and print state changes
    Watch,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let credentials = match cli.credentials {
        Some(path) => path,
        None => commands::default_credentials_path()?,
    };
    let session = Session::open(cli.api_url.as_deref(), &credentials)?;

    match cli.command {
        Commands::Login { email } => commands::login(&session, email, cli.format).await,
        Commands::Logout => commands::logout(&session, cli.format).await,
        Commands::Status => commands::status(&session, cli.format).await,
        Commands::Get { path } => commands::get(&session, &path, cli.format).await,
        Commands::Watch => commands::watch(&session, cli.format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = observability::init_with_config(observability::LogConfig {
        service_name: "cashflow-cli".into(),
        default_level: cli.log_level.clone(),
        json: cli.format == output::OutputFormat::Json,
        log_path: cli.log_file.clone(),
        also_stderr: true,
    }) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let format = cli.format;
    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e), format);
        std::process::exit(1);
    }
}
