//! Activity command - history of syncs and imports per item

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use finsync_core::services::{ActivityEntry, ActivityFilter, ActivityKind};

use super::open_activity_log;
use crate::output;

#[derive(Subcommand)]
pub enum ActivityCommands {
    /// Show recent activity, newest first
    List {
        /// Only activity of this item
        #[arg(long)]
        item: Option<String>,
        /// Only failed activity
        #[arg(long)]
        errors: bool,
        #[arg(short, long, default_value = "50")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Totals per item
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Delete old activity
    Prune {
        /// Delete activity older than N days
        #[arg(long, default_value = "90")]
        older_than_days: i64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        #[arg(long)]
        json: bool,
    },
}

fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn describe_counts(entry: &ActivityEntry) -> String {
    let counts = entry.counts;
    let mut parts = match entry.kind {
        ActivityKind::Command => Vec::new(),
        ActivityKind::AccountSync => vec![format!("{} accounts", counts.imported)],
        ActivityKind::TransactionCheck => vec![format!("{} new", counts.new), format!("{} stored", counts.skipped)],
        ActivityKind::TransactionImport => vec![
            format!("{} imported", counts.imported),
            format!("{} skipped", counts.skipped),
        ],
    };
    if counts.failed > 0 {
        parts.push(format!("{} failed", counts.failed));
    }
    if entry.needs_relogin {
        parts.push("re-login required".to_string());
    }
    parts.join(", ")
}

pub fn run(command: ActivityCommands) -> Result<()> {
    let log = open_activity_log()?;

    match command {
        ActivityCommands::List {
            item,
            errors,
            limit,
            json,
        } => {
            let entries = log.recent(&ActivityFilter {
                item_id: item,
                errors_only: errors,
                limit,
            });
            if json {
                return output::json_result(entries);
            }
            let entries = entries?;
            if entries.is_empty() {
                println!("No activity recorded.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Time", "Activity", "Item", "Outcome", "Error"]);
            for entry in entries {
                let subject = match (&entry.item_id, entry.provider) {
                    (Some(id), Some(provider)) => format!("{} ({})", id, provider),
                    (Some(id), None) => id.clone(),
                    (None, _) => entry.command.clone().unwrap_or_default(),
                };
                table.add_row(vec![
                    format_timestamp(entry.timestamp),
                    entry.kind.to_string(),
                    subject,
                    describe_counts(&entry),
                    entry
                        .error_message
                        .as_deref()
                        .map(|m| m.red().to_string())
                        .unwrap_or_default(),
                ]);
            }
            println!("{}", table);
        }
        ActivityCommands::Summary { json } => {
            let summary = log.summary();
            if json {
                return output::json_result(summary);
            }
            let summary = summary?;
            println!("{}", "Activity".bold());
            println!("  Entries: {}", summary.entries);
            println!("  Errors: {}", summary.errors);
            if summary.items.is_empty() {
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Item", "Provider", "Last activity", "Imported", "Accounts", "Errors"]);
            for item in summary.items {
                table.add_row(vec![
                    item.item_id,
                    item.provider.map(|p| p.to_string()).unwrap_or_default(),
                    format_timestamp(item.last_activity),
                    item.transactions_imported.to_string(),
                    item.accounts_upserted.to_string(),
                    item.errors.to_string(),
                ]);
            }
            println!("{}", table);
        }
        ActivityCommands::Prune {
            older_than_days,
            force,
            json,
        } => {
            let cutoff_ms = (Utc::now() - Duration::days(older_than_days)).timestamp_millis();

            if !force && !json {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete activity older than {} days?", older_than_days))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = log.prune_before(cutoff_ms);
            if json {
                return output::json_result(deleted.map(|n| serde_json::json!({ "deleted": n })));
            }
            println!("Deleted {} entries", deleted?);
        }
    }

    Ok(())
}
