//! Product pass-throughs: identity, auth numbers, live balances, investments, payments
//!
//! Thin capability-checked wrappers over the provider adapter. Results are
//! returned as the provider's JSON (live balances as raw accounts) and are
//! not persisted.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::domain::result::{Error, Result};
use crate::domain::{Capability, LinkedItem, ProviderKind, RawAccount};
use crate::ports::{LinkTokenRequest, PaymentRequest, ProviderAdapter, ProviderRegistry, Repository};
use crate::services::link::flag_needs_relogin;

/// Days of investment transactions returned
pub const INVESTMENT_WINDOW_DAYS: i64 = 30;

/// A created payment plus the link token that lets the user authorize it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub recipient_id: String,
    pub payment_id: String,
    pub status: Option<String>,
    pub link_token: String,
}

pub struct ProductService {
    repository: Arc<dyn Repository>,
    providers: ProviderRegistry,
}

impl ProductService {
    pub fn new(repository: Arc<dyn Repository>, providers: ProviderRegistry) -> Self {
        Self {
            repository,
            providers,
        }
    }

    pub async fn identity(&self, item: &LinkedItem) -> Result<JsonValue> {
        let adapter = self.adapter_for(item, Capability::GetIdentity)?;
        let result = adapter.get_identity(item.credentials()).await;
        self.watch_relogin(item, result).await
    }

    pub async fn auth(&self, item: &LinkedItem) -> Result<JsonValue> {
        let adapter = self.adapter_for(item, Capability::GetAuth)?;
        let result = adapter.get_auth(item.credentials()).await;
        self.watch_relogin(item, result).await
    }

    /// Balances fetched live from the institution. Stored accounts are not touched.
    pub async fn balances(&self, item: &LinkedItem) -> Result<Vec<RawAccount>> {
        let adapter = self.adapter_for(item, Capability::GetBalance)?;
        let result = adapter.get_balances(item.credentials()).await;
        self.watch_relogin(item, result).await
    }

    /// Investment transactions over the last 30 days ending `today`
    pub async fn investment_transactions(&self, item: &LinkedItem, today: NaiveDate) -> Result<JsonValue> {
        let adapter = self.adapter_for(item, Capability::GetInvestmentTransactions)?;
        let start = today - Duration::days(INVESTMENT_WINDOW_DAYS);
        let result = adapter
            .get_investment_transactions(item.credentials(), start, today)
            .await;
        self.watch_relogin(item, result).await
    }

    pub async fn holdings(&self, item: &LinkedItem) -> Result<JsonValue> {
        let adapter = self.adapter_for(item, Capability::GetHoldings)?;
        let result = adapter.get_holdings(item.credentials()).await;
        self.watch_relogin(item, result).await
    }

    /// Create recipient and payment, then a link token bound to the payment
    pub async fn initiate_payment(
        &self,
        provider: ProviderKind,
        request: &PaymentRequest,
        client_user_id: &str,
    ) -> Result<PaymentInitiation> {
        if request.amount <= rust_decimal::Decimal::ZERO {
            return Err(Error::validation("Payment amount must be positive"));
        }
        let adapter = self.providers.get(provider)?;
        adapter.ensure_supported(Capability::CreatePayment)?;
        adapter.ensure_supported(Capability::CreateLinkToken)?;

        let created = adapter.create_payment(request).await?;
        let link = adapter
            .create_link_token(&LinkTokenRequest {
                client_user_id: client_user_id.to_string(),
                payment_id: Some(created.payment_id.clone()),
                access_token: None,
            })
            .await?;
        info!(%provider, payment_id = %created.payment_id, "payment initiated");

        Ok(PaymentInitiation {
            recipient_id: created.recipient_id,
            payment_id: created.payment_id,
            status: created.status,
            link_token: link.link_token,
        })
    }

    pub async fn get_payment(&self, provider: ProviderKind, payment_id: &str) -> Result<JsonValue> {
        let adapter = self.providers.get(provider)?;
        adapter.ensure_supported(Capability::GetPayment)?;
        adapter.get_payment(payment_id).await
    }

    /// Investment transactions for the current UTC date
    pub async fn recent_investment_transactions(&self, item: &LinkedItem) -> Result<JsonValue> {
        self.investment_transactions(item, Utc::now().date_naive()).await
    }

    fn adapter_for(&self, item: &LinkedItem, capability: Capability) -> Result<Arc<dyn ProviderAdapter>> {
        let adapter = self.providers.get(item.provider)?;
        adapter.ensure_supported(capability)?;
        Ok(adapter)
    }

    /// Flag the item when the provider demands a re-login, then pass the result on
    async fn watch_relogin<T>(&self, item: &LinkedItem, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_login_required() {
                flag_needs_relogin(self.repository.as_ref(), item).await?;
            }
        }
        result
    }
}
