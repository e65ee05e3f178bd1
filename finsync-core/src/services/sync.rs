//! Transaction sync pipeline
//!
//! Two phases over a date window: `check` partitions provider transactions
//! into new and already-imported without writing anything, and `import`
//! stores reviewed transactions with insert-if-absent semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{Capability, Category, LinkedItem, RawTransaction, Transaction};
use crate::ports::{CurrencyConverter, ProviderRegistry, Repository};
use crate::services::link::flag_needs_relogin;

/// Days re-fetched before the last sync, to pick up late-posting transactions
pub const LOOKBACK_DAYS: i64 = 40;

/// Start of the window for items that were never synced
pub fn epoch_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SyncWindow {
    /// Window for an item as of `today`
    pub fn for_item(item: &LinkedItem, today: NaiveDate) -> Self {
        let start = match item.last_synced_at {
            None => epoch_floor(),
            Some(at) => (at.date_naive() - Duration::days(LOOKBACK_DAYS)).max(epoch_floor()),
        };
        Self {
            start: start.min(today),
            end: today,
        }
    }

    /// Window for an item as of the current UTC date
    pub fn current(item: &LinkedItem) -> Self {
        Self::for_item(item, Utc::now().date_naive())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub item_id: String,
    pub window: SyncWindow,
    /// Transactions not yet stored, in provider order
    pub new: Vec<RawTransaction>,
    pub already_imported: usize,
    pub needs_relogin: bool,
}

/// A transaction skipped for a reason other than already being stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxError {
    pub transaction_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub item_id: String,
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<TxError>,
}

pub struct TransactionSyncService {
    repository: Arc<dyn Repository>,
    converter: Arc<dyn CurrencyConverter>,
    providers: ProviderRegistry,
    base_currency: String,
}

impl TransactionSyncService {
    pub fn new(
        repository: Arc<dyn Repository>,
        converter: Arc<dyn CurrencyConverter>,
        providers: ProviderRegistry,
        base_currency: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            converter,
            providers,
            base_currency: base_currency.into().to_uppercase(),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Fetch the window's transactions and report which ones are new.
    ///
    /// Writes nothing, except flagging the item when the provider demands a
    /// re-login.
    pub async fn check(&self, item: &LinkedItem, window: SyncWindow) -> Result<CheckResult> {
        let mut result = CheckResult {
            item_id: item.item_id.clone(),
            window,
            new: Vec::new(),
            already_imported: 0,
            needs_relogin: false,
        };

        if item.needs_relogin {
            debug!(item_id = %item.item_id, "skipping check, item needs re-login");
            result.needs_relogin = true;
            return Ok(result);
        }

        let adapter = self.providers.get(item.provider)?;
        adapter.ensure_supported(Capability::GetTransactions)?;

        let fetched = match adapter
            .get_transactions(item.credentials(), window.start, window.end)
            .await
        {
            Ok(transactions) => transactions,
            Err(e) if e.is_login_required() => {
                flag_needs_relogin(self.repository.as_ref(), item).await?;
                result.needs_relogin = true;
                return Ok(result);
            }
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        for tx in fetched {
            if !seen.insert(tx.transaction_id.clone()) {
                continue;
            }
            if self.repository.transaction_exists(&tx.transaction_id).await? {
                result.already_imported += 1;
            } else {
                result.new.push(tx);
            }
        }

        debug!(
            item_id = %item.item_id,
            start = %window.start,
            end = %window.end,
            new = result.new.len(),
            already_imported = result.already_imported,
            "check complete"
        );
        Ok(result)
    }

    /// Store reviewed transactions.
    ///
    /// Already-stored ids are skipped. Conversion problems are collected per
    /// transaction; a persistence failure aborts the batch and leaves
    /// `last_synced_at` untouched.
    pub async fn import(&self, item: &LinkedItem, transactions: &[RawTransaction]) -> Result<ImportResult> {
        let mut result = ImportResult {
            item_id: item.item_id.clone(),
            ..Default::default()
        };
        let mut account_names: HashMap<String, Option<String>> = HashMap::new();

        for raw in transactions {
            if self.repository.transaction_exists(&raw.transaction_id).await? {
                result.skipped += 1;
                continue;
            }

            let currency = match raw.currency_code.as_deref().map(str::trim) {
                Some(code) if !code.is_empty() => code.to_uppercase(),
                _ => {
                    result.errors.push(TxError {
                        transaction_id: raw.transaction_id.clone(),
                        message: "Transaction has no currency code".to_string(),
                    });
                    continue;
                }
            };

            let amount = raw.stored_amount();
            let normalized_amount = match self
                .converter
                .normalize(amount, &currency, &self.base_currency, raw.date)
                .await
            {
                Ok(value) => value,
                Err(Error::Conversion(message)) => {
                    warn!(transaction_id = %raw.transaction_id, %message, "skipping transaction");
                    result.errors.push(TxError {
                        transaction_id: raw.transaction_id.clone(),
                        message,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let category = self.resolve_category(item, raw).await?;

            let account_name_snapshot = match account_names.get(&raw.account_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .repository
                        .get_account(&raw.account_id, item.provider)
                        .await?
                        .map(|a| a.label().to_string());
                    account_names.insert(raw.account_id.clone(), name.clone());
                    name
                }
            };

            let tx = Transaction {
                transaction_id: raw.transaction_id.clone(),
                account_id: raw.account_id.clone(),
                provider: item.provider,
                date: raw.date,
                description: raw.name.clone(),
                amount,
                currency_code: currency,
                normalized_amount,
                category_id: category.id,
                category_name: category.app_category_name,
                account_name_snapshot,
                pending: raw.pending,
                imported_at: Utc::now(),
            };

            if self.repository.upsert_transaction(&tx).await? {
                result.imported += 1;
            } else {
                result.skipped += 1;
            }
        }

        let mut stored = self
            .repository
            .get_linked_item(&item.item_id)
            .await?
            .unwrap_or_else(|| item.clone());
        stored.mark_synced(Utc::now());
        self.repository.upsert_linked_item(&stored).await?;

        info!(
            item_id = %item.item_id,
            provider = %item.provider,
            imported = result.imported,
            skipped = result.skipped,
            errors = result.errors.len(),
            "import complete"
        );
        Ok(result)
    }

    /// Category for the provider code, or Uncategorized when nothing maps
    async fn resolve_category(&self, item: &LinkedItem, raw: &RawTransaction) -> Result<Category> {
        let code = match raw.category_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code,
            _ => return Ok(Category::uncategorized()),
        };
        Ok(self
            .repository
            .lookup_category(item.provider, code)
            .await?
            .unwrap_or_else(Category::uncategorized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderKind;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_for_never_synced_item() {
        let item = LinkedItem::new(ProviderKind::Plaid, "item-1", "tok", None);
        let window = SyncWindow::for_item(&item, date(2024, 6, 15));
        assert_eq!(window.start, date(2000, 1, 1));
        assert_eq!(window.end, date(2024, 6, 15));
    }

    #[test]
    fn test_window_looks_back_forty_days() {
        let mut item = LinkedItem::new(ProviderKind::Plaid, "item-1", "tok", None);
        item.last_synced_at = Some(Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap());
        let window = SyncWindow::for_item(&item, date(2024, 3, 12));
        assert_eq!(window.start, date(2024, 1, 30));
        assert_eq!(window.end, date(2024, 3, 12));
    }

    #[test]
    fn test_window_never_starts_before_floor_or_after_today() {
        let mut item = LinkedItem::new(ProviderKind::Plaid, "item-1", "tok", None);
        item.last_synced_at = Some(Utc.with_ymd_and_hms(2000, 1, 5, 0, 0, 0).unwrap());
        assert_eq!(SyncWindow::for_item(&item, date(2024, 1, 1)).start, date(2000, 1, 1));

        item.last_synced_at = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        let window = SyncWindow::for_item(&item, date(2024, 1, 1));
        assert_eq!(window.start, date(2024, 1, 1));
    }
}
