//! Accounts command - reconcile provider accounts into the local store

use anyhow::{anyhow, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;

use finsync_core::services::{Activity, ActivityKind, ActivityLog, AccountSyncResult};
use finsync_core::{Account, ProviderKind};

use super::{get_context, record, select_items};
use crate::output;

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Fetch accounts from the provider and upsert them
    Sync {
        /// Item to reconcile (all items if not specified)
        item_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List stored accounts
    List {
        /// Only accounts of this item
        #[arg(long)]
        item: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Hide an account from listings and imports; later syncs keep the flag
    Ignore {
        account_id: String,
        #[arg(long, default_value = "plaid")]
        provider: ProviderKind,
        /// Stop ignoring the account
        #[arg(long)]
        undo: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show an account under a name of your choosing
    Rename {
        account_id: String,
        /// New name; omit to go back to the provider's name
        name: Option<String>,
        #[arg(long, default_value = "plaid")]
        provider: ProviderKind,
        #[arg(long)]
        json: bool,
    },
}

/// Per-item outcome; `error` is set when the item could not be reconciled at all
#[derive(Serialize)]
struct ItemAccounts {
    item_id: String,
    result: Option<AccountSyncResult>,
    error: Option<String>,
}

pub async fn run(command: AccountsCommands, log: Option<&ActivityLog>) -> Result<()> {
    let ctx = get_context()?;

    match command {
        AccountsCommands::Sync { item_id, json } => {
            let items = select_items(&ctx, item_id.as_deref()).await?;
            let mut outcomes = Vec::with_capacity(items.len());
            for item in &items {
                let outcome = match ctx.account_service.sync_accounts(item).await {
                    Ok(result) => {
                        record(log, Activity::account_sync(item, &result));
                        ItemAccounts {
                            item_id: item.item_id.clone(),
                            result: Some(result),
                            error: None,
                        }
                    }
                    Err(e) => {
                        record(log, Activity::item_failed(ActivityKind::AccountSync, item, &e));
                        ItemAccounts {
                            item_id: item.item_id.clone(),
                            result: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                outcomes.push(outcome);
            }

            let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
            if json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
                return if failed > 0 {
                    Err(output::Reported.into())
                } else {
                    Ok(())
                };
            }
            if outcomes.is_empty() {
                output::warning("No linked items.");
            }
            for outcome in &outcomes {
                print_outcome(outcome);
            }
            if failed > 0 {
                return Err(anyhow!("{} of {} items failed to reconcile", failed, outcomes.len()));
            }
        }
        AccountsCommands::List { item, json } => {
            let result = ctx.account_service.list_accounts(item.as_deref()).await;
            if json {
                return output::json_result(result);
            }
            let accounts = result?;
            if accounts.is_empty() {
                output::warning("No accounts. Run 'finsync accounts sync' first.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Account", "Name", "Institution", "Type", "Balance", "Available", "Currency"]);
            for account in accounts {
                table.add_row(vec![
                    account.account_id.clone(),
                    display_label(&account),
                    account.institution.clone().unwrap_or_default(),
                    account.account_type.clone(),
                    output::format_amount(account.current_balance),
                    output::format_amount(account.available),
                    account.currency_code.clone(),
                ]);
            }
            println!("{}", table);
        }
        AccountsCommands::Ignore {
            account_id,
            provider,
            undo,
            json,
        } => {
            let result = ctx.account_service.set_ignored(&account_id, provider, !undo).await;
            if json {
                return output::json_result(result);
            }
            let account = result?;
            if account.ignored {
                output::success(&format!("Ignoring {}", account.label()));
            } else {
                output::success(&format!("No longer ignoring {}", account.label()));
            }
        }
        AccountsCommands::Rename {
            account_id,
            name,
            provider,
            json,
        } => {
            let result = ctx.account_service.rename(&account_id, provider, name.as_deref()).await;
            if json {
                return output::json_result(result);
            }
            let account = result?;
            output::success(&format!("{} is now shown as '{}'", account.account_id, account.label()));
        }
    }

    Ok(())
}

fn display_label(account: &Account) -> String {
    let label = match &account.display_name {
        Some(_) => format!("{} ({})", account.label(), account.name),
        None => account.name.clone(),
    };
    if account.ignored {
        format!("{} (ignored)", label).dimmed().to_string()
    } else {
        label
    }
}

fn print_outcome(outcome: &ItemAccounts) {
    let result = match (&outcome.result, &outcome.error) {
        (Some(result), _) => result,
        (None, Some(error)) => {
            println!("{} {}: {}", "Failed:".red(), outcome.item_id, error);
            return;
        }
        (None, None) => return,
    };
    if result.needs_relogin {
        println!("{} {} - re-login required", "Skipped:".yellow(), result.item_id);
        return;
    }
    println!("{} {}", "Synced:".green(), result.item_id);
    println!("  Accounts upserted: {}", result.upserted);
    for failure in &result.failed {
        println!("  {} {}: {}", "Failed".red(), failure.account_id, failure.message);
    }
}
