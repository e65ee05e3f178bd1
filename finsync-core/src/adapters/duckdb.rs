//! DuckDB repository implementation
//!
//! Implements the `Repository` port and the `CurrencyConverter` port over a
//! single DuckDB file. All access goes through one connection behind a mutex,
//! so each statement (and therefore each row-level upsert) is atomic with
//! respect to concurrent callers.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection, OptionalExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, Category, ExchangeRate, LinkedItem, ProviderKind, Transaction, RATE_BASE_CURRENCY,
};
use crate::ports::{CurrencyConverter, Repository};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                    })
                }
                Err(e) if attempt + 1 < MAX_RETRIES && is_retryable_error(&e.to_string()) => {
                    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                    warn!(
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        "database busy, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn try_open_connection(db_path: &Path) -> duckdb::Result<Connection> {
        // Extensions are statically linked; never autoload cached ones
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::persistence(format!("Database lock poisoned: {}", e)))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    // === Exchange rates ===

    /// Insert or replace rates. Returns the number of rows written.
    pub fn upsert_exchange_rates(&self, rates: &[ExchangeRate]) -> Result<usize> {
        let conn = self.conn()?;
        let mut written = 0;
        for rate in rates {
            written += conn.execute(
                "INSERT INTO sys_exchange_rates (rate_date, currency, rate) VALUES (?, ?, ?)
                 ON CONFLICT (rate_date, currency) DO UPDATE SET rate = EXCLUDED.rate",
                params![
                    rate.date.to_string(),
                    rate.currency.to_uppercase(),
                    decimal_to_db(rate.rate)
                ],
            )?;
        }
        Ok(written)
    }

    /// Most recent rate for `currency` on or before `as_of`
    pub fn rate_on_or_before(&self, currency: &str, as_of: NaiveDate) -> Result<Option<Decimal>> {
        if currency.eq_ignore_ascii_case(RATE_BASE_CURRENCY) {
            return Ok(Some(Decimal::ONE));
        }
        let conn = self.conn()?;
        let rate: Option<f64> = conn
            .query_row(
                "SELECT rate FROM sys_exchange_rates
                 WHERE currency = ? AND rate_date <= CAST(? AS DATE)
                 ORDER BY rate_date DESC LIMIT 1",
                params![currency.to_uppercase(), as_of.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rate.map(decimal_from_db))
    }

    pub fn transaction_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sys_transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}

const LINKED_ITEM_COLUMNS: &str = "item_id, access_token, institution_name, provider,
    needs_relogin, last_synced_at, created_at, updated_at";

fn row_to_linked_item(row: &duckdb::Row) -> duckdb::Result<LinkedItem> {
    let provider: String = row.get(3)?;
    let last_synced: Option<String> = row.get(5)?;
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;

    Ok(LinkedItem {
        item_id: row.get(0)?,
        access_token: row.get(1)?,
        institution_name: row.get(2)?,
        provider: parse_provider(3, &provider)?,
        needs_relogin: row.get(4)?,
        last_synced_at: last_synced
            .map(|s| parse_timestamp(5, &s))
            .transpose()?,
        created_at: parse_timestamp(6, &created)?,
        updated_at: parse_timestamp(7, &updated)?,
    })
}

const ACCOUNT_COLUMNS: &str = "account_id, provider, item_id, name, institution, account_type,
    subtype, current_balance, credit_limit, available, currency_code, ignored, updated_at,
    display_name";

fn row_to_account(row: &duckdb::Row) -> duckdb::Result<Account> {
    let provider: String = row.get(1)?;
    let updated: String = row.get(12)?;

    Ok(Account {
        account_id: row.get(0)?,
        provider: parse_provider(1, &provider)?,
        item_id: row.get(2)?,
        name: row.get(3)?,
        institution: row.get(4)?,
        account_type: row.get(5)?,
        subtype: row.get(6)?,
        current_balance: row.get::<_, Option<f64>>(7)?.map(decimal_from_db),
        limit: row.get::<_, Option<f64>>(8)?.map(decimal_from_db),
        available: row.get::<_, Option<f64>>(9)?.map(decimal_from_db),
        currency_code: row.get(10)?,
        ignored: row.get(11)?,
        updated_at: parse_timestamp(12, &updated)?,
        display_name: row.get(13)?,
    })
}

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, provider, tx_date::VARCHAR,
    description, amount, currency_code, normalized_amount, category_id, category_name,
    account_name_snapshot, pending, imported_at";

fn row_to_transaction(row: &duckdb::Row) -> duckdb::Result<Transaction> {
    let provider: String = row.get(2)?;
    let date: String = row.get(3)?;
    let imported: String = row.get(12)?;

    Ok(Transaction {
        transaction_id: row.get(0)?,
        account_id: row.get(1)?,
        provider: parse_provider(2, &provider)?,
        date: parse_date(3, &date)?,
        description: row.get(4)?,
        amount: decimal_from_db(row.get(5)?),
        currency_code: row.get(6)?,
        normalized_amount: decimal_from_db(row.get(7)?),
        category_id: row.get(8)?,
        category_name: row.get(9)?,
        account_name_snapshot: row.get(10)?,
        pending: row.get(11)?,
        imported_at: parse_timestamp(12, &imported)?,
    })
}

#[async_trait]
impl Repository for DuckDbRepository {
    async fn get_linked_item(&self, item_id: &str) -> Result<Option<LinkedItem>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM sys_linked_items WHERE item_id = ?", LINKED_ITEM_COLUMNS);
        let item = conn
            .query_row(&sql, params![item_id], row_to_linked_item)
            .optional()?;
        Ok(item)
    }

    async fn list_linked_items(&self) -> Result<Vec<LinkedItem>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_linked_items ORDER BY created_at",
            LINKED_ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_linked_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    async fn upsert_linked_item(&self, item: &LinkedItem) -> Result<()> {
        let conn = self.conn()?;
        // created_at is kept from the first insert
        conn.execute(
            "INSERT INTO sys_linked_items (item_id, access_token, institution_name, provider,
                                           needs_relogin, last_synced_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (item_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                institution_name = COALESCE(EXCLUDED.institution_name, sys_linked_items.institution_name),
                provider = EXCLUDED.provider,
                needs_relogin = EXCLUDED.needs_relogin,
                last_synced_at = EXCLUDED.last_synced_at,
                updated_at = EXCLUDED.updated_at",
            params![
                item.item_id,
                item.access_token,
                item.institution_name,
                item.provider.as_str(),
                item.needs_relogin,
                item.last_synced_at.map(|t| t.to_rfc3339()),
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn()?;
        // `ignored` and `display_name` belong to the user and are never part of the update
        conn.execute(
            "INSERT INTO sys_accounts (account_id, provider, item_id, name, institution, account_type,
                                       subtype, current_balance, credit_limit, available,
                                       currency_code, ignored, updated_at, display_name)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (account_id, provider) DO UPDATE SET
                item_id = EXCLUDED.item_id,
                name = EXCLUDED.name,
                institution = COALESCE(EXCLUDED.institution, sys_accounts.institution),
                account_type = EXCLUDED.account_type,
                subtype = EXCLUDED.subtype,
                current_balance = EXCLUDED.current_balance,
                credit_limit = EXCLUDED.credit_limit,
                available = EXCLUDED.available,
                currency_code = EXCLUDED.currency_code,
                updated_at = EXCLUDED.updated_at",
            params![
                account.account_id,
                account.provider.as_str(),
                account.item_id,
                account.name,
                account.institution,
                account.account_type,
                account.subtype,
                account.current_balance.map(decimal_to_db),
                account.limit.map(decimal_to_db),
                account.available.map(decimal_to_db),
                account.currency_code,
                account.ignored,
                account.updated_at.to_rfc3339(),
                account.display_name,
            ],
        )?;
        Ok(())
    }

    async fn get_account(&self, account_id: &str, provider: ProviderKind) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_accounts WHERE account_id = ? AND provider = ?",
            ACCOUNT_COLUMNS
        );
        let account = conn
            .query_row(&sql, params![account_id, provider.as_str()], row_to_account)
            .optional()?;
        Ok(account)
    }

    async fn list_accounts(&self, item_id: Option<&str>) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_accounts WHERE (? IS NULL OR item_id = ?) ORDER BY name, account_id",
            ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![item_id, item_id], row_to_account)?;
        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    async fn set_account_ignored(
        &self,
        account_id: &str,
        provider: ProviderKind,
        ignored: bool,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sys_accounts SET ignored = ? WHERE account_id = ? AND provider = ?",
            params![ignored, account_id, provider.as_str()],
        )?;
        Ok(changed > 0)
    }

    async fn set_account_display_name(
        &self,
        account_id: &str,
        provider: ProviderKind,
        display_name: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sys_accounts SET display_name = ? WHERE account_id = ? AND provider = ?",
            params![display_name, account_id, provider.as_str()],
        )?;
        Ok(changed > 0)
    }

    async fn transaction_exists(&self, transaction_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sys_transactions WHERE transaction_id = ?",
            params![transaction_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<bool> {
        let conn = self.conn()?;
        let rows_changed = conn.execute(
            "INSERT INTO sys_transactions (transaction_id, account_id, provider, tx_date, description,
                                           amount, currency_code, normalized_amount, category_id,
                                           category_name, account_name_snapshot, pending, imported_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (transaction_id) DO NOTHING",
            params![
                tx.transaction_id,
                tx.account_id,
                tx.provider.as_str(),
                tx.date.to_string(),
                tx.description,
                decimal_to_db(tx.amount),
                tx.currency_code,
                decimal_to_db(tx.normalized_amount),
                tx.category_id,
                tx.category_name,
                tx.account_name_snapshot,
                tx.pending,
                tx.imported_at.to_rfc3339(),
            ],
        )?;
        Ok(rows_changed > 0)
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_transactions WHERE transaction_id = ?",
            TRANSACTION_COLUMNS
        );
        let tx = conn
            .query_row(&sql, params![transaction_id], row_to_transaction)
            .optional()?;
        Ok(tx)
    }

    async fn lookup_category(&self, provider: ProviderKind, code: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT category_id, app_category_name, provider_category_code
                 FROM sys_categories WHERE provider = ? AND provider_category_code = ?",
                params![provider.as_str(), code],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        app_category_name: row.get(1)?,
                        provider_category_code: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(category)
    }
}

#[async_trait]
impl CurrencyConverter for DuckDbRepository {
    async fn normalize(
        &self,
        amount: Decimal,
        source: &str,
        target: &str,
        as_of: NaiveDate,
    ) -> Result<Decimal> {
        if source.eq_ignore_ascii_case(target) {
            return Ok(amount.round_dp(2));
        }

        let missing = |currency: &str| {
            Error::Conversion(format!(
                "No exchange rate for {} on or before {}",
                currency.to_uppercase(),
                as_of
            ))
        };
        let source_rate = self
            .rate_on_or_before(source, as_of)?
            .ok_or_else(|| missing(source))?;
        let target_rate = self
            .rate_on_or_before(target, as_of)?
            .ok_or_else(|| missing(target))?;

        convert(amount, source_rate, target_rate)
            .ok_or_else(|| Error::Conversion(format!("Invalid {} rate on {}", source, as_of)))
    }
}

/// Cross-convert through EUR: amount / source_rate * target_rate, rounded to cents
pub fn convert(amount: Decimal, source_rate: Decimal, target_rate: Decimal) -> Option<Decimal> {
    if source_rate.is_zero() {
        return None;
    }
    amount
        .checked_div(source_rate)?
        .checked_mul(target_rate)
        .map(|v| v.round_dp(2))
}

// Helper functions

fn decimal_to_db(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn decimal_from_db(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

fn conversion_error<E>(idx: usize, e: E) -> duckdb::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_provider(idx: usize, s: &str) -> duckdb::Result<ProviderKind> {
    ProviderKind::from_str(s).map_err(|e| conversion_error(idx, e))
}

fn parse_timestamp(idx: usize, s: &str) -> duckdb::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_date(idx: usize, s: &str) -> duckdb::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}
