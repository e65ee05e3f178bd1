//! Sync command - check for new transactions, preview, confirm, import

use anyhow::{anyhow, bail, Result};
use colored::Colorize;
use dialoguer::Confirm;
use serde::Serialize;

use finsync_core::services::{Activity, ActivityKind, ActivityLog, CheckResult, ImportResult, SyncWindow};
use finsync_core::{FinsyncContext, LinkedItem};

use super::{get_context, record, select_items};
use crate::output;

/// Rows shown in the preview before truncating
const PREVIEW_ROWS: usize = 20;

/// Outcome for one item. A failed check or import is kept in `error` and
/// the remaining items still run.
#[derive(Serialize)]
struct ItemSync {
    item_id: String,
    check: Option<CheckResult>,
    import: Option<ImportResult>,
    error: Option<String>,
}

#[derive(Serialize)]
struct SyncReport {
    items: Vec<ItemSync>,
    failed: usize,
}

struct SyncOptions {
    yes: bool,
    check_only: bool,
    json: bool,
}

pub async fn run(
    item_id: Option<String>,
    yes: bool,
    check_only: bool,
    json: bool,
    log: Option<&ActivityLog>,
) -> Result<()> {
    if json && !yes && !check_only {
        bail!("--json cannot prompt for confirmation; pass --yes or --check-only");
    }
    let interactive = atty::is(atty::Stream::Stdin);
    if !yes && !check_only && !interactive {
        bail!("stdin is not a terminal; pass --yes to import without confirmation");
    }

    let ctx = get_context()?;
    let items = select_items(&ctx, item_id.as_deref()).await?;
    let options = SyncOptions { yes, check_only, json };
    let report = sync_items(&ctx, &items, &options, log).await?;

    let failed = report.iter().filter(|item| item.error.is_some()).count();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&SyncReport { items: report, failed })?
        );
        if failed > 0 {
            return Err(output::Reported.into());
        }
        return Ok(());
    }
    if items.is_empty() {
        output::warning("No linked items. Use 'finsync link exchange' or 'finsync link register'.");
    }
    if failed > 0 {
        return Err(anyhow!("{} of {} items failed to sync", failed, items.len()));
    }
    Ok(())
}

async fn sync_items(
    ctx: &FinsyncContext,
    items: &[LinkedItem],
    options: &SyncOptions,
    log: Option<&ActivityLog>,
) -> Result<Vec<ItemSync>> {
    let mut report = Vec::with_capacity(items.len());
    for item in items {
        let outcome = sync_item(ctx, item, options, log).await?;
        if let Some(error) = &outcome.error {
            if !options.json {
                println!("{} {}: {}", "Failed:".red(), outcome.item_id, error);
            }
        }
        report.push(outcome);
    }
    Ok(report)
}

/// Check one item, then import after confirmation. Provider and store errors
/// end up in the returned `ItemSync`; only a failed prompt is returned as `Err`.
async fn sync_item(
    ctx: &FinsyncContext,
    item: &LinkedItem,
    options: &SyncOptions,
    log: Option<&ActivityLog>,
) -> Result<ItemSync> {
    let mut outcome = ItemSync {
        item_id: item.item_id.clone(),
        check: None,
        import: None,
        error: None,
    };

    let window = SyncWindow::current(item);
    let check = match ctx.sync_service.check(item, window).await {
        Ok(check) => check,
        Err(e) => {
            record(log, Activity::item_failed(ActivityKind::TransactionCheck, item, &e));
            outcome.error = Some(e.to_string());
            return Ok(outcome);
        }
    };
    record(log, Activity::check(item, &check));
    if !options.json {
        print_check(&check);
    }

    if !check.needs_relogin && !check.new.is_empty() && !options.check_only {
        let confirmed = options.yes
            || Confirm::new()
                .with_prompt(format!("Import {} transactions?", check.new.len()))
                .default(true)
                .interact()?;
        if confirmed {
            match ctx.sync_service.import(item, &check.new).await {
                Ok(result) => {
                    record(log, Activity::import(item, &result));
                    if !options.json {
                        print_import(&result);
                    }
                    outcome.import = Some(result);
                }
                Err(e) => {
                    record(log, Activity::item_failed(ActivityKind::TransactionImport, item, &e));
                    outcome.error = Some(e.to_string());
                }
            }
        } else if !options.json {
            println!("Skipped.");
        }
    }

    outcome.check = Some(check);
    Ok(outcome)
}

fn print_check(check: &CheckResult) {
    if check.needs_relogin {
        println!(
            "{} {} - re-login required, run 'finsync link refresh {}'",
            "Skipped:".yellow(),
            check.item_id,
            check.item_id
        );
        return;
    }

    println!("{} {}", "Item:".bold(), check.item_id);
    println!("  Window: {} to {}", check.window.start, check.window.end);
    println!("  New: {}", check.new.len());
    println!("  Already imported: {}", check.already_imported);

    if check.new.is_empty() {
        return;
    }
    let mut table = output::create_table();
    table.set_header(vec!["Date", "Description", "Amount", "Currency", "Pending"]);
    for tx in check.new.iter().take(PREVIEW_ROWS) {
        table.add_row(vec![
            tx.date.to_string(),
            tx.name.clone(),
            format!("{:.2}", tx.stored_amount()),
            tx.currency_code.clone().unwrap_or_else(|| "?".to_string()),
            if tx.pending { "yes".to_string() } else { String::new() },
        ]);
    }
    println!("{}", table);
    if check.new.len() > PREVIEW_ROWS {
        println!("  ... and {} more", check.new.len() - PREVIEW_ROWS);
    }
}

fn print_import(result: &ImportResult) {
    println!("{} {}", "Imported:".green(), result.imported);
    if result.skipped > 0 {
        println!("  Skipped: {} (already exists)", result.skipped);
    }
    for error in &result.errors {
        println!("  {} {}: {}", "Not imported".red(), error.transaction_id, error.message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    use finsync_core::adapters::duckdb::DuckDbRepository;
    use finsync_core::config::Config;
    use finsync_core::domain::result::{Error, ProviderErrorKind, Result as CoreResult};
    use finsync_core::domain::{Capability, Credentials, ProviderKind, RawTransaction};
    use finsync_core::ports::{ProviderAdapter, ProviderRegistry, Repository};
    use finsync_core::services::ActivityFilter;

    use super::*;

    /// Transactions fail for one access token and are empty for every other
    struct OneBadItem;

    #[async_trait]
    impl ProviderAdapter for OneBadItem {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Plaid
        }

        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::GetTransactions]
        }

        async fn get_transactions(
            &self,
            credentials: Credentials<'_>,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> CoreResult<Vec<RawTransaction>> {
            if credentials.access_token == "access-bad" {
                return Err(Error::provider(
                    ProviderKind::Plaid,
                    ProviderErrorKind::Unavailable,
                    "institution down",
                ));
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_item_does_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(DuckDbRepository::new(&dir.path().join("finsync.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        let ctx = FinsyncContext::from_parts(
            Config::default(),
            repo.clone(),
            ProviderRegistry::new().with(Arc::new(OneBadItem)),
        );

        let bad = LinkedItem::new(ProviderKind::Plaid, "item-bad", "access-bad", None);
        let good = LinkedItem::new(ProviderKind::Plaid, "item-good", "access-good", None);
        repo.upsert_linked_item(&bad).await.unwrap();
        repo.upsert_linked_item(&good).await.unwrap();

        let log = ActivityLog::in_memory("test").unwrap();
        let options = SyncOptions {
            yes: true,
            check_only: false,
            json: true,
        };
        let report = sync_items(&ctx, &[bad, good], &options, Some(&log)).await.unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report[0].item_id, "item-bad");
        assert!(report[0].check.is_none());
        assert!(report[0].error.as_deref().unwrap().contains("institution down"));
        assert_eq!(report[1].item_id, "item-good");
        assert!(report[1].error.is_none());
        assert!(report[1].check.as_ref().unwrap().new.is_empty());

        let errors = log
            .recent(&ActivityFilter {
                errors_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].item_id.as_deref(), Some("item-bad"));
        assert_eq!(errors[0].kind, ActivityKind::TransactionCheck);
    }
}
