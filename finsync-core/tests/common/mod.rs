//! Shared test fixtures: a scripted provider and a fault-injecting repository
//!
//! Provider network IO is replaced at the trait level; all database
//! operations run against a real DuckDB file in a temp directory.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;

use finsync_core::adapters::duckdb::DuckDbRepository;
use finsync_core::domain::result::{Error, ProviderError, ProviderErrorKind, Result};
use finsync_core::domain::{
    Account, Capability, Category, Credentials, ExchangeRate, LinkedItem, ProviderKind,
    RawAccount, RawTransaction, Transaction,
};
use finsync_core::ports::{ItemInfo, LinkToken, LinkTokenRequest, ProviderAdapter, Repository, TokenExchange};

pub const ALL_CAPABILITIES: &[Capability] = &Capability::ALL;

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Create a test repository with schema initialized
pub fn create_test_repo(temp_dir: &TempDir) -> Arc<DuckDbRepository> {
    let db_path = temp_dir.path().join("test.duckdb");
    let repo = DuckDbRepository::new(&db_path).expect("Failed to create repository");
    repo.ensure_schema().expect("Failed to initialize schema");
    Arc::new(repo)
}

/// USD and GBP rates valid from 2024-01-01
pub fn seed_rates(repo: &DuckDbRepository) {
    repo.upsert_exchange_rates(&[
        ExchangeRate {
            date: date("2024-01-01"),
            currency: "USD".into(),
            rate: dec("1.25"),
        },
        ExchangeRate {
            date: date("2024-01-01"),
            currency: "GBP".into(),
            rate: dec("0.80"),
        },
    ])
    .expect("Failed to seed rates");
}

pub fn raw_account(id: &str, account_type: &str, current: &str) -> RawAccount {
    RawAccount {
        account_id: id.to_string(),
        name: format!("Account {}", id),
        official_name: None,
        account_type: account_type.to_string(),
        subtype: None,
        current: Some(dec(current)),
        available: None,
        limit: None,
        currency_code: Some("USD".into()),
    }
}

pub fn raw_tx(id: &str, account_id: &str, day: &str, amount: &str, category: Option<&str>) -> RawTransaction {
    RawTransaction {
        transaction_id: id.to_string(),
        account_id: account_id.to_string(),
        date: date(day),
        name: format!("Merchant {}", id),
        amount: dec(amount),
        currency_code: Some("USD".into()),
        category_code: category.map(String::from),
        pending: false,
    }
}

fn provider_error(kind: ProviderKind, error: ProviderErrorKind) -> Error {
    ProviderError::new(kind, error, "scripted failure").into()
}

/// A provider whose responses are set up by the test
pub struct ScriptedProvider {
    pub kind: ProviderKind,
    pub capabilities: &'static [Capability],
    pub accounts: Mutex<Vec<RawAccount>>,
    pub transactions: Mutex<Vec<RawTransaction>>,
    /// Error returned by both get_accounts and get_transactions
    pub fetch_error: Mutex<Option<ProviderErrorKind>>,
    pub item_lookup_fails: Mutex<bool>,
    /// Number of "not ready" answers before the report is ready; None = never ready
    pub report_not_ready: Mutex<Option<u32>>,
    pub report_error: Mutex<Option<ProviderErrorKind>>,
    pub fetch_calls: AtomicU32,
    pub report_get_calls: AtomicU32,
    pub pdf_calls: AtomicU32,
    pub link_requests: Mutex<Vec<LinkTokenRequest>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            capabilities: ALL_CAPABILITIES,
            accounts: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            fetch_error: Mutex::new(None),
            item_lookup_fails: Mutex::new(false),
            report_not_ready: Mutex::new(Some(0)),
            report_error: Mutex::new(None),
            fetch_calls: AtomicU32::new(0),
            report_get_calls: AtomicU32::new(0),
            pdf_calls: AtomicU32::new(0),
            link_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &'static [Capability]) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn set_accounts(&self, accounts: Vec<RawAccount>) {
        *self.accounts.lock().unwrap() = accounts;
    }

    pub fn set_transactions(&self, transactions: Vec<RawTransaction>) {
        *self.transactions.lock().unwrap() = transactions;
    }

    pub fn fail_fetch_with(&self, kind: Option<ProviderErrorKind>) {
        *self.fetch_error.lock().unwrap() = kind;
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn report_get_calls(&self) -> u32 {
        self.report_get_calls.load(Ordering::SeqCst)
    }

    fn check_fetch(&self) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match *self.fetch_error.lock().unwrap() {
            Some(kind) => Err(provider_error(self.kind, kind)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> &'static [Capability] {
        self.capabilities
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange> {
        let suffix = public_token
            .strip_prefix("public-")
            .ok_or_else(|| provider_error(self.kind, ProviderErrorKind::Auth))?;
        Ok(TokenExchange {
            access_token: format!("access-{}", suffix),
            item_id: format!("item-{}", suffix),
        })
    }

    async fn create_link_token(&self, request: &LinkTokenRequest) -> Result<LinkToken> {
        self.link_requests.lock().unwrap().push(request.clone());
        let mode = if request.access_token.is_some() { "update" } else { "new" };
        Ok(LinkToken {
            link_token: format!("link-sandbox-{}-{}", mode, request.client_user_id),
            expiration: None,
        })
    }

    async fn create_public_token(&self, credentials: Credentials<'_>) -> Result<String> {
        let suffix = credentials
            .access_token
            .strip_prefix("access-")
            .ok_or_else(|| provider_error(self.kind, ProviderErrorKind::Auth))?;
        Ok(format!("public-{}", suffix))
    }

    async fn get_item(&self, credentials: Credentials<'_>) -> Result<ItemInfo> {
        if *self.item_lookup_fails.lock().unwrap() {
            return Err(provider_error(self.kind, ProviderErrorKind::Unavailable));
        }
        Ok(ItemInfo {
            item_id: credentials.item_id.to_string(),
            institution_id: Some("ins_1".into()),
            institution_name: Some("First Platypus Bank".into()),
        })
    }

    async fn get_accounts(&self, _credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        self.check_fetch()?;
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn get_balances(&self, credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        self.get_accounts(credentials).await
    }

    async fn get_transactions(
        &self,
        _credentials: Credentials<'_>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        self.check_fetch()?;
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.date >= start && t.date <= end)
            .cloned()
            .collect())
    }

    async fn create_asset_report(&self, _access_token: &str, days_requested: u32) -> Result<String> {
        Ok(format!("assets-sandbox-{}", days_requested))
    }

    async fn get_asset_report(&self, report_token: &str) -> Result<JsonValue> {
        let call = self.report_get_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(kind) = *self.report_error.lock().unwrap() {
            return Err(provider_error(self.kind, kind));
        }
        match *self.report_not_ready.lock().unwrap() {
            Some(n) if call > n => Ok(json!({ "asset_report_token": report_token, "items": [] })),
            _ => Err(provider_error(self.kind, ProviderErrorKind::ProductNotReady)),
        }
    }

    async fn get_asset_report_pdf(&self, _report_token: &str) -> Result<Vec<u8>> {
        self.pdf_calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"%PDF-1.4 scripted".to_vec())
    }
}

/// Delegates to DuckDB but fails chosen writes, optionally after a delay
pub struct FaultyRepository {
    pub inner: Arc<DuckDbRepository>,
    pub failing_accounts: Mutex<HashSet<String>>,
    pub failing_transactions: Mutex<HashSet<String>>,
    pub account_upsert_delay: Mutex<Option<Duration>>,
}

impl FaultyRepository {
    pub fn new(inner: Arc<DuckDbRepository>) -> Self {
        Self {
            inner,
            failing_accounts: Mutex::new(HashSet::new()),
            failing_transactions: Mutex::new(HashSet::new()),
            account_upsert_delay: Mutex::new(None),
        }
    }

    /// Every account upsert sleeps this long before writing (or failing)
    pub fn delay_account_upserts(&self, delay: Duration) {
        *self.account_upsert_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_account(&self, account_id: &str) {
        self.failing_accounts.lock().unwrap().insert(account_id.to_string());
    }

    pub fn fail_transaction(&self, transaction_id: &str) {
        self.failing_transactions
            .lock()
            .unwrap()
            .insert(transaction_id.to_string());
    }
}

#[async_trait]
impl Repository for FaultyRepository {
    async fn get_linked_item(&self, item_id: &str) -> Result<Option<LinkedItem>> {
        self.inner.get_linked_item(item_id).await
    }

    async fn list_linked_items(&self) -> Result<Vec<LinkedItem>> {
        self.inner.list_linked_items().await
    }

    async fn upsert_linked_item(&self, item: &LinkedItem) -> Result<()> {
        self.inner.upsert_linked_item(item).await
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let delay = *self.account_upsert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_accounts.lock().unwrap().contains(&account.account_id) {
            return Err(Error::persistence(format!("injected failure for {}", account.account_id)));
        }
        self.inner.upsert_account(account).await
    }

    async fn get_account(&self, account_id: &str, provider: ProviderKind) -> Result<Option<Account>> {
        self.inner.get_account(account_id, provider).await
    }

    async fn list_accounts(&self, item_id: Option<&str>) -> Result<Vec<Account>> {
        self.inner.list_accounts(item_id).await
    }

    async fn set_account_ignored(&self, account_id: &str, provider: ProviderKind, ignored: bool) -> Result<bool> {
        self.inner.set_account_ignored(account_id, provider, ignored).await
    }

    async fn set_account_display_name(
        &self,
        account_id: &str,
        provider: ProviderKind,
        display_name: Option<&str>,
    ) -> Result<bool> {
        self.inner
            .set_account_display_name(account_id, provider, display_name)
            .await
    }

    async fn transaction_exists(&self, transaction_id: &str) -> Result<bool> {
        self.inner.transaction_exists(transaction_id).await
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> Result<bool> {
        if self
            .failing_transactions
            .lock()
            .unwrap()
            .contains(&tx.transaction_id)
        {
            return Err(Error::persistence(format!("injected failure for {}", tx.transaction_id)));
        }
        self.inner.upsert_transaction(tx).await
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        self.inner.get_transaction(transaction_id).await
    }

    async fn lookup_category(&self, provider: ProviderKind, code: &str) -> Result<Option<Category>> {
        self.inner.lookup_category(provider, code).await
    }
}
