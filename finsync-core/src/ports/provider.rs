//! Provider adapter port
//!
//! A single capability-queryable interface over the financial-data
//! aggregators (Plaid, Salt Edge). Services ask an adapter what it supports
//! instead of branching on the provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::result::{Error, Result};
use crate::domain::{Capability, Credentials, ProviderKind, RawAccount, RawTransaction};

/// Long-lived credential returned by a public token exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_id: String,
}

/// Item metadata used to name a linked item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemInfo {
    pub item_id: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
}

/// Parameters for a Link token
#[derive(Debug, Clone, Default)]
pub struct LinkTokenRequest {
    pub client_user_id: String,
    /// Attach the token to a payment created beforehand
    pub payment_id: Option<String>,
    /// Open Link in update mode for an existing item instead of adding a new one
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientAddress {
    pub street: Vec<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// A payment to initiate against a new recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub recipient_name: String,
    pub iban: String,
    pub address: Option<RecipientAddress>,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub recipient_id: String,
    pub payment_id: String,
    pub status: Option<String>,
}

/// An interactive connection session the user completes in a browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectSession {
    pub connect_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregator adapter.
///
/// Every operation has a default implementation that fails with
/// `Error::UnsupportedOperation` without touching the network, so an adapter
/// only overrides what it lists in `capabilities()`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Operations this adapter implements
    fn capabilities(&self) -> &'static [Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Fail fast with `UnsupportedOperation` when `capability` is missing
    fn ensure_supported(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(Error::unsupported(self.kind(), capability))
        }
    }

    async fn exchange_public_token(&self, _public_token: &str) -> Result<TokenExchange> {
        Err(Error::unsupported(self.kind(), Capability::ExchangePublicToken))
    }

    async fn create_link_token(&self, _request: &LinkTokenRequest) -> Result<LinkToken> {
        Err(Error::unsupported(self.kind(), Capability::CreateLinkToken))
    }

    /// One-time public token for an existing item, used to start Link in update mode
    async fn create_public_token(&self, _credentials: Credentials<'_>) -> Result<String> {
        Err(Error::unsupported(self.kind(), Capability::CreatePublicToken))
    }

    async fn get_item(&self, _credentials: Credentials<'_>) -> Result<ItemInfo> {
        Err(Error::unsupported(self.kind(), Capability::GetItem))
    }

    async fn get_accounts(&self, _credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        Err(Error::unsupported(self.kind(), Capability::GetAccounts))
    }

    /// Accounts with balances fetched in real time rather than from the provider's cache
    async fn get_balances(&self, _credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        Err(Error::unsupported(self.kind(), Capability::GetBalance))
    }

    /// All transactions with a date in `[start, end]`, across every page
    async fn get_transactions(
        &self,
        _credentials: Credentials<'_>,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        Err(Error::unsupported(self.kind(), Capability::GetTransactions))
    }

    async fn get_identity(&self, _credentials: Credentials<'_>) -> Result<JsonValue> {
        Err(Error::unsupported(self.kind(), Capability::GetIdentity))
    }

    async fn get_auth(&self, _credentials: Credentials<'_>) -> Result<JsonValue> {
        Err(Error::unsupported(self.kind(), Capability::GetAuth))
    }

    async fn get_investment_transactions(
        &self,
        _credentials: Credentials<'_>,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<JsonValue> {
        Err(Error::unsupported(self.kind(), Capability::GetInvestmentTransactions))
    }

    async fn get_holdings(&self, _credentials: Credentials<'_>) -> Result<JsonValue> {
        Err(Error::unsupported(self.kind(), Capability::GetHoldings))
    }

    /// Start generating an asset report, returning its report token
    async fn create_asset_report(&self, _access_token: &str, _days_requested: u32) -> Result<String> {
        Err(Error::unsupported(self.kind(), Capability::CreateAssetReport))
    }

    /// Fetch a report; fails with `ProductNotReady` while it is still generating
    async fn get_asset_report(&self, _report_token: &str) -> Result<JsonValue> {
        Err(Error::unsupported(self.kind(), Capability::GetAssetReport))
    }

    async fn get_asset_report_pdf(&self, _report_token: &str) -> Result<Vec<u8>> {
        Err(Error::unsupported(self.kind(), Capability::GetAssetReportPdf))
    }

    async fn create_payment(&self, _request: &PaymentRequest) -> Result<PaymentCreated> {
        Err(Error::unsupported(self.kind(), Capability::CreatePayment))
    }

    async fn get_payment(&self, _payment_id: &str) -> Result<JsonValue> {
        Err(Error::unsupported(self.kind(), Capability::GetPayment))
    }

    /// Reconnect an existing connection interactively
    async fn refresh_connection_interactive(
        &self,
        _credentials: Credentials<'_>,
        _return_to: Option<&str>,
    ) -> Result<ConnectSession> {
        Err(Error::unsupported(self.kind(), Capability::RefreshConnectionInteractive))
    }

    /// Open a session for a new connection
    async fn create_connection_interactive(
        &self,
        _customer_id: &str,
        _return_to: Option<&str>,
    ) -> Result<ConnectSession> {
        Err(Error::unsupported(self.kind(), Capability::CreateConnectionInteractive))
    }
}

/// Configured provider adapters, keyed by kind
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Config(format!("Provider '{}' is not configured", kind)))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
