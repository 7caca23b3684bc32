//! Merchant Pulse CLI - webhook worker and queue management tools.
//!
//! # Usage
//!
//! ```bash
//! # Process webhook jobs from the Redis queue
//! pulse-cli worker --concurrency 4
//!
//! # Print every job in the queue as JSON
//! pulse-cli queue snapshot
//!
//! # Remove all waiting, delayed, completed and failed jobs
//! pulse-cli queue clear --yes
//!
//! # Encrypt a store access token for the `stores` table
//! pulse-cli token encrypt shpat_0123456789abcdef
//! ```
//!
//! # Commands
//!
//! - `worker` - Run the webhook worker until Ctrl+C / SIGTERM
//! - `queue` - Inspect or clear the webhook queue
//! - `token` - Generate keys and encrypt access tokens

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use pulse_admin::config::PulseConfig;
use pulse_admin::telemetry;

mod commands;

#[derive(Parser)]
#[command(name = "pulse-cli")]
#[command(author, version, about = "Merchant Pulse CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process webhook jobs until interrupted
    Worker {
        /// Jobs processed in parallel (defaults to `WEBHOOK_WORKER_CONCURRENCY`)
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Inspect or clear the webhook queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Manage stored access tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print backend and capabilities
    Status,
    /// Print all jobs as JSON
    Snapshot {
        /// Pretty-print the JSON
        #[arg(short, long)]
        pretty: bool,
    },
    /// Remove all jobs that are not currently being processed
    Clear {
        /// Skip the safety check
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Print a new random `SHOPIFY_TOKEN_ENCRYPTION_KEY`
    GenerateKey,
    /// Encrypt an access token with `SHOPIFY_TOKEN_ENCRYPTION_KEY`
    Encrypt {
        /// Plaintext token (read from stdin when omitted)
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match PulseConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let _sentry_guard = telemetry::init_sentry(&config);
    telemetry::init_tracing("pulse_cli=info,pulse_admin=info", config.log_json);
    config.log_warnings();

    let result: Result<(), commands::CliError> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &PulseConfig) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Worker { concurrency } => commands::worker::run(config, concurrency).await?,
        Commands::Queue { action } => match action {
            QueueAction::Status => commands::queue::status(config).await?,
            QueueAction::Snapshot { pretty } => commands::queue::snapshot(config, pretty).await?,
            QueueAction::Clear { yes } => commands::queue::clear(config, yes).await?,
        },
        Commands::Token { action } => match action {
            TokenAction::GenerateKey => commands::token::generate_key(),
            TokenAction::Encrypt { token } => commands::token::encrypt(config, token)?,
        },
    }
    Ok(())
}
