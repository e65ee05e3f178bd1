//! finsync CLI - link bank accounts and sync transactions

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{accounts, activity, items, link, products, rates, report, sync};
use finsync_core::services::{Activity, ActivityLog};

/// finsync - account linking and transaction sync
#[derive(Parser)]
#[command(name = "finsync", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link institutions and manage connection sessions
    Link {
        #[command(subcommand)]
        command: link::LinkCommands,
    },

    /// List linked items
    Items {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile or list accounts
    Accounts {
        #[command(subcommand)]
        command: accounts::AccountsCommands,
    },

    /// Check for new transactions and import them
    Sync {
        /// Item to sync (all items if not specified)
        item_id: Option<String>,
        /// Import without asking for confirmation
        #[arg(long, short)]
        yes: bool,
        /// Only report what would be imported
        #[arg(long)]
        check_only: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate provider reports
    Report {
        #[command(subcommand)]
        command: report::ReportCommands,
    },

    /// Identity, auth, investment and payment data
    Products {
        #[command(subcommand)]
        command: products::ProductCommands,
    },

    /// Manage exchange rates
    Rates {
        #[command(subcommand)]
        command: rates::RatesCommands,
    },

    /// History of syncs and imports per item
    Activity {
        #[command(subcommand)]
        command: activity::ActivityCommands,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Link { .. } => "link",
            Commands::Items { .. } => "items",
            Commands::Accounts { .. } => "accounts",
            Commands::Sync { .. } => "sync",
            Commands::Report { .. } => "report",
            Commands::Products { .. } => "products",
            Commands::Rates { .. } => "rates",
            Commands::Activity { .. } => "activity",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FINSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command_name = cli.command.name();
    // The activity command reads the log, so it is not recorded in it
    let log = match cli.command {
        Commands::Activity { .. } => None,
        _ => commands::activity_log(),
    };

    match run(cli, log.as_ref()).await {
        Ok(()) => {
            commands::record(log.as_ref(), Activity::command(command_name));
            ExitCode::SUCCESS
        }
        Err(e) => {
            commands::record(log.as_ref(), Activity::command(command_name).with_error(&e));
            if !e.is::<output::Reported>() {
                output::error(&format!("{:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, log: Option<&ActivityLog>) -> Result<()> {
    match cli.command {
        Commands::Link { command } => link::run(command).await,
        Commands::Items { json } => items::run(json).await,
        Commands::Accounts { command } => accounts::run(command, log).await,
        Commands::Sync {
            item_id,
            yes,
            check_only,
            json,
        } => sync::run(item_id, yes, check_only, json, log).await,
        Commands::Report { command } => report::run(command).await,
        Commands::Products { command } => products::run(command).await,
        Commands::Rates { command } => rates::run(command),
        Commands::Activity { command } => activity::run(command),
    }
}
