//! Activity log - per-item history of account syncs, checks and imports
//!
//! Kept in its own activity.duckdb next to the main database. Entries carry
//! item ids, the provider, counts and error messages only; access tokens,
//! account balances and transaction details are never written here.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use duckdb::types::Type;
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::{LinkedItem, ProviderKind};
use crate::log_migrations::LOG_MIGRATIONS;
use crate::services::{AccountSyncResult, CheckResult, ImportResult, MigrationService};

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Timestamp in the lower 48 bits, counter in the upper 16
fn generate_id() -> u64 {
    let timestamp = now_ms().max(0) as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (timestamp << 16) | counter
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A CLI command finished or failed
    Command,
    AccountSync,
    TransactionCheck,
    TransactionImport,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::AccountSync => "account_sync",
            Self::TransactionCheck => "transaction_check",
            Self::TransactionImport => "transaction_import",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "command" => Ok(Self::Command),
            "account_sync" => Ok(Self::AccountSync),
            "transaction_check" => Ok(Self::TransactionCheck),
            "transaction_import" => Ok(Self::TransactionImport),
            other => Err(Error::validation(format!("Unknown activity kind '{}'", other))),
        }
    }
}

/// Row counts attached to an activity. Which ones are set depends on the kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    /// Transactions found that were not stored yet
    pub new: u64,
    /// Transactions inserted, or accounts upserted
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// An outcome to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub item_id: Option<String>,
    pub provider: Option<ProviderKind>,
    pub command: Option<String>,
    pub counts: ActivityCounts,
    pub needs_relogin: bool,
    pub error_message: Option<String>,
}

impl Activity {
    fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            item_id: None,
            provider: None,
            command: None,
            counts: ActivityCounts::default(),
            needs_relogin: false,
            error_message: None,
        }
    }

    fn for_item(kind: ActivityKind, item: &LinkedItem) -> Self {
        Self {
            item_id: Some(item.item_id.clone()),
            provider: Some(item.provider),
            ..Self::new(kind)
        }
    }

    pub fn command(name: impl Into<String>) -> Self {
        Self {
            command: Some(name.into()),
            ..Self::new(ActivityKind::Command)
        }
    }

    pub fn account_sync(item: &LinkedItem, result: &AccountSyncResult) -> Self {
        Self {
            counts: ActivityCounts {
                imported: result.upserted as u64,
                failed: result.failed.len() as u64,
                ..Default::default()
            },
            needs_relogin: result.needs_relogin,
            ..Self::for_item(ActivityKind::AccountSync, item)
        }
    }

    pub fn check(item: &LinkedItem, check: &CheckResult) -> Self {
        Self {
            counts: ActivityCounts {
                new: check.new.len() as u64,
                skipped: check.already_imported as u64,
                ..Default::default()
            },
            needs_relogin: check.needs_relogin,
            ..Self::for_item(ActivityKind::TransactionCheck, item)
        }
    }

    pub fn import(item: &LinkedItem, result: &ImportResult) -> Self {
        Self {
            counts: ActivityCounts {
                imported: result.imported as u64,
                skipped: result.skipped as u64,
                failed: result.errors.len() as u64,
                ..Default::default()
            },
            ..Self::for_item(ActivityKind::TransactionImport, item)
        }
    }

    /// A stage that failed outright for this item
    pub fn item_failed(kind: ActivityKind, item: &LinkedItem, error: impl fmt::Display) -> Self {
        Self::for_item(kind, item).with_error(error)
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error_message = Some(error.to_string());
        self
    }
}

/// An activity as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: u64,
    /// Unix milliseconds
    pub timestamp: i64,
    pub app_version: String,
    pub kind: ActivityKind,
    pub item_id: Option<String>,
    pub provider: Option<ProviderKind>,
    pub command: Option<String>,
    pub counts: ActivityCounts,
    pub needs_relogin: bool,
    pub error_message: Option<String>,
}

impl ActivityEntry {
    /// Failed outright, or lost some rows
    pub fn is_error(&self) -> bool {
        self.error_message.is_some() || self.counts.failed > 0
    }
}

#[derive(Debug, Clone)]
pub struct ActivityFilter {
    pub item_id: Option<String>,
    pub errors_only: bool,
    pub limit: usize,
}

impl Default for ActivityFilter {
    fn default() -> Self {
        Self {
            item_id: None,
            errors_only: false,
            limit: 50,
        }
    }
}

/// Totals for one item across every recorded activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemActivity {
    pub item_id: String,
    pub provider: Option<ProviderKind>,
    pub last_activity: i64,
    pub transactions_imported: u64,
    pub accounts_upserted: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub entries: u64,
    pub errors: u64,
    pub items: Vec<ItemActivity>,
}

const ENTRY_COLUMNS: &str = "id, timestamp, app_version, kind, item_id, provider, command,
    new_count, imported_count, skipped_count, failed_count, needs_relogin, error_message";

const ERROR_CONDITION: &str = "(error_message IS NOT NULL OR failed_count > 0)";

fn conversion_error(idx: usize, e: Error) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn optional_provider(idx: usize, value: Option<String>) -> duckdb::Result<Option<ProviderKind>> {
    value
        .map(|s| ProviderKind::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn row_to_entry(row: &duckdb::Row) -> duckdb::Result<ActivityEntry> {
    let kind: String = row.get(3)?;
    Ok(ActivityEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        app_version: row.get(2)?,
        kind: ActivityKind::from_str(&kind).map_err(|e| conversion_error(3, e))?,
        item_id: row.get(4)?,
        provider: optional_provider(5, row.get(5)?)?,
        command: row.get(6)?,
        counts: ActivityCounts {
            new: row.get(7)?,
            imported: row.get(8)?,
            skipped: row.get(9)?,
            failed: row.get(10)?,
        },
        needs_relogin: row.get(11)?,
        error_message: row.get(12)?,
    })
}

pub struct ActivityLog {
    conn: Mutex<Connection>,
    app_version: String,
}

impl ActivityLog {
    /// Open or create activity.duckdb in `dir` and run pending migrations
    pub fn open(dir: &Path, app_version: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(dir.join("activity.duckdb"))?;
        Self::with_connection(conn, app_version)
    }

    pub fn in_memory(app_version: impl Into<String>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, app_version)
    }

    fn with_connection(conn: Connection, app_version: impl Into<String>) -> Result<Self> {
        MigrationService::with_migrations(&conn, LOG_MIGRATIONS).run_pending()?;
        Ok(Self {
            conn: Mutex::new(conn),
            app_version: app_version.into(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::persistence(format!("Activity database lock poisoned: {}", e)))
    }

    pub fn record(&self, activity: &Activity) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO sys_activity (
                id, timestamp, app_version, kind, item_id, provider, command,
                new_count, imported_count, skipped_count, failed_count,
                needs_relogin, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                generate_id(),
                now_ms(),
                &self.app_version,
                activity.kind.as_str(),
                &activity.item_id,
                activity.provider.map(|p| p.as_str()),
                &activity.command,
                activity.counts.new,
                activity.counts.imported,
                activity.counts.skipped,
                activity.counts.failed,
                activity.needs_relogin,
                &activity.error_message,
            ],
        )?;
        Ok(())
    }

    /// Matching entries, newest first
    pub fn recent(&self, filter: &ActivityFilter) -> Result<Vec<ActivityEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_activity
             WHERE (? IS NULL OR item_id = ?) AND (NOT ? OR {})
             ORDER BY timestamp DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS, ERROR_CONDITION
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                &filter.item_id,
                &filter.item_id,
                filter.errors_only,
                filter.limit as i64
            ],
            row_to_entry,
        )?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn summary(&self) -> Result<ActivitySummary> {
        let conn = self.conn()?;
        let (entries, errors): (i64, i64) = conn.query_row(
            &format!(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE {}) FROM sys_activity",
                ERROR_CONDITION
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT item_id, MAX(provider), MAX(timestamp),
                CAST(COALESCE(SUM(imported_count) FILTER (WHERE kind = 'transaction_import'), 0) AS UBIGINT),
                CAST(COALESCE(SUM(imported_count) FILTER (WHERE kind = 'account_sync'), 0) AS UBIGINT),
                CAST(COUNT(*) FILTER (WHERE {}) AS UBIGINT)
             FROM sys_activity
             WHERE item_id IS NOT NULL
             GROUP BY item_id
             ORDER BY item_id",
            ERROR_CONDITION
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(ItemActivity {
                item_id: row.get(0)?,
                provider: optional_provider(1, row.get(1)?)?,
                last_activity: row.get(2)?,
                transactions_imported: row.get(3)?,
                accounts_upserted: row.get(4)?,
                errors: row.get(5)?,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }

        Ok(ActivitySummary {
            entries: entries.max(0) as u64,
            errors: errors.max(0) as u64,
            items,
        })
    }

    /// Delete entries older than the given unix timestamp in milliseconds
    pub fn prune_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM sys_activity WHERE timestamp < ?", [timestamp_ms])?;
        Ok(deleted as u64)
    }
}
