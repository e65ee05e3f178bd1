//! Salt Edge API client
//!
//! Account information API v5. Requests carry `App-id` / `Secret` headers and
//! every payload is wrapped in a `{ "data": ... }` envelope. Lists are paged
//! with `meta.next_id`.
//!
//! Salt Edge reports outflows as negative amounts and credit-card debt as a
//! negative balance. The adapter converts both into the Plaid convention so
//! the services apply the same sign rules to every provider.
//!
//! API Documentation: https://docs.saltedge.com/account_information/v5/

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use super::plaid::{map_request_error, parse_amount};
use crate::config::SaltEdgeConfig;
use crate::domain::result::{Error, ProviderError, ProviderErrorKind, Result};
use crate::domain::{Capability, Credentials, ProviderKind, RawAccount, RawTransaction};
use crate::ports::{ConnectSession, ProviderAdapter};

const SALTEDGE_PRODUCTION_URL: &str = "https://www.saltedge.com/api/v5";

const REQUEST_TIMEOUT_SECS: u64 = 120;

const SALTEDGE_CAPABILITIES: &[Capability] = &[
    Capability::GetAccounts,
    Capability::GetTransactions,
    Capability::RefreshConnectionInteractive,
    Capability::CreateConnectionInteractive,
];

// =============================================================================
// API Response Models
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    next_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<SaltEdgeErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct SaltEdgeErrorBody {
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Salt Edge account
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaltEdgeAccount {
    pub id: String,
    pub name: String,
    /// "account", "card", "checking", "credit_card", "savings", "loan", ...
    pub nature: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub balance: Decimal,
    pub currency_code: String,
    #[serde(default)]
    pub extra: SaltEdgeAccountExtra,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SaltEdgeAccountExtra {
    #[serde(default, deserialize_with = "deserialize_optional_amount")]
    pub available_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_amount")]
    pub credit_limit: Option<Decimal>,
}

/// Salt Edge transaction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaltEdgeTransaction {
    pub id: String,
    pub account_id: String,
    pub made_on: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: Decimal,
    pub currency_code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    /// "posted" or "pending"
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectSessionData {
    connect_url: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

fn deserialize_amount<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;
    let value: JsonValue = Deserialize::deserialize(deserializer)?;
    parse_amount(&value).ok_or_else(|| D::Error::custom(format!("invalid amount: {}", value)))
}

fn deserialize_optional_amount<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_amount))
}

// =============================================================================
// Error classification and mapping
// =============================================================================

/// Map a Salt Edge error response onto a normalized provider error
pub fn classify_saltedge_error(status: StatusCode, body: &[u8]) -> ProviderError {
    let parsed: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
    let error = parsed.error.unwrap_or_default();
    let class = error.class.unwrap_or_default();

    let kind = match class.as_str() {
        "InvalidCredentials" | "ConnectionDisabled" | "ConsentExpired" | "InteractiveAdapterTimeout" => {
            ProviderErrorKind::ItemLoginRequired
        }
        "AppIdNotFound" | "WrongClientSecret" | "SecretNotFound" | "ClientDisabled" | "ConnectionNotFound" => {
            ProviderErrorKind::Auth
        }
        "RateLimitExceeded" | "TooManyRequests" => ProviderErrorKind::RateLimited,
        "ProviderUnavailable" | "ProviderError" | "ProviderDisabled" => ProviderErrorKind::Unavailable,
        _ if status == StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        _ if status == StatusCode::UNAUTHORIZED => ProviderErrorKind::Auth,
        _ if status.is_server_error() => ProviderErrorKind::Unavailable,
        _ => ProviderErrorKind::Unknown,
    };

    let message = error
        .message
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    let provider_error = ProviderError::new(ProviderKind::SaltEdge, kind, message);
    if class.is_empty() {
        provider_error
    } else {
        provider_error.with_code(class)
    }
}

/// Translate a Salt Edge account nature into Plaid's account type
pub fn account_type_for_nature(nature: &str) -> &'static str {
    match nature {
        "card" | "credit" | "credit_card" => "credit",
        "loan" | "mortgage" => "loan",
        "investment" | "insurance" | "bonus" => "investment",
        "account" | "checking" | "savings" | "debit_card" | "ewallet" => "depository",
        _ => "other",
    }
}

fn map_account(account: SaltEdgeAccount) -> RawAccount {
    let account_type = account_type_for_nature(&account.nature);
    // Plaid reports owed credit balances as positive numbers
    let current = if account_type == "credit" {
        -account.balance
    } else {
        account.balance
    };

    RawAccount {
        account_id: account.id,
        name: account.name,
        official_name: None,
        account_type: account_type.to_string(),
        subtype: Some(account.nature),
        current: Some(current),
        available: account.extra.available_amount,
        limit: account.extra.credit_limit,
        currency_code: Some(account.currency_code),
    }
}

fn map_transaction(tx: SaltEdgeTransaction) -> Result<RawTransaction> {
    let date = NaiveDate::parse_from_str(&tx.made_on, "%Y-%m-%d").map_err(|e| {
        Error::MalformedResponse(format!(
            "Salt Edge transaction {} has invalid date '{}': {}",
            tx.id, tx.made_on, e
        ))
    })?;

    Ok(RawTransaction {
        transaction_id: tx.id,
        account_id: tx.account_id,
        date,
        name: tx.description,
        // Plaid reports outflows as positive amounts
        amount: -tx.amount,
        currency_code: Some(tx.currency_code),
        category_code: tx.category,
        pending: tx.status.as_deref() == Some("pending"),
    })
}

// =============================================================================
// Salt Edge provider
// =============================================================================

/// Salt Edge adapter
#[derive(Debug)]
pub struct SaltEdgeProvider {
    client: Client,
    base_url: String,
    app_id: String,
    secret: String,
}

impl SaltEdgeProvider {
    pub fn new(config: &SaltEdgeConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::Config(
                "Salt Edge app id and secret are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(SALTEDGE_PRODUCTION_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            app_id: config.app_id.clone(),
            secret: config.secret.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("App-id", &self.app_id)
            .header("Secret", &self.secret)
            .header("Accept", "application/json")
    }

    async fn execute<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> Result<Envelope<T>> {
        debug!(provider = "saltedge", path, "request");
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| map_request_error(ProviderKind::SaltEdge, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_request_error(ProviderKind::SaltEdge, e))?;

        if !status.is_success() {
            return Err(classify_saltedge_error(status, &bytes).into());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::MalformedResponse(format!("Salt Edge {}: {}", path, e)))
    }

    /// Fetch every page of a list endpoint
    async fn get_all<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        let mut items = Vec::new();
        let mut from_id: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).query(query);
            if let Some(id) = &from_id {
                request = request.query(&[("from_id", id.as_str())]);
            }

            let page: Envelope<Vec<T>> = self.execute(path, request).await?;
            let received = page.data.len();
            items.extend(page.data);

            from_id = page.meta.and_then(|m| m.next_id);
            if from_id.is_none() || received == 0 {
                break;
            }
        }

        Ok(items)
    }

    async fn connect_session(&self, path: &str, data: JsonValue) -> Result<ConnectSession> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.post(&url).json(&json!({ "data": data }));
        let envelope: Envelope<ConnectSessionData> = self.execute(path, request).await?;
        Ok(ConnectSession {
            connect_url: envelope.data.connect_url,
            expires_at: envelope.data.expires_at,
        })
    }
}

#[async_trait]
impl ProviderAdapter for SaltEdgeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SaltEdge
    }

    fn capabilities(&self) -> &'static [Capability] {
        SALTEDGE_CAPABILITIES
    }

    async fn get_accounts(&self, credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        let accounts: Vec<SaltEdgeAccount> = self
            .get_all("/accounts", &[("connection_id", credentials.access_token)])
            .await?;
        Ok(accounts.into_iter().map(map_account).collect())
    }

    async fn get_transactions(
        &self,
        credentials: Credentials<'_>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        let transactions: Vec<SaltEdgeTransaction> = self
            .get_all("/transactions", &[("connection_id", credentials.access_token)])
            .await?;

        let mut raw = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let tx = map_transaction(tx)?;
            // The list endpoint has no date filter
            if tx.date >= start && tx.date <= end {
                raw.push(tx);
            }
        }
        Ok(raw)
    }

    async fn refresh_connection_interactive(
        &self,
        credentials: Credentials<'_>,
        return_to: Option<&str>,
    ) -> Result<ConnectSession> {
        let mut data = json!({ "connection_id": credentials.access_token });
        if let Some(url) = return_to {
            data["attempt"] = json!({ "return_to": url });
        }
        self.connect_session("/connect_sessions/refresh", data).await
    }

    async fn create_connection_interactive(
        &self,
        customer_id: &str,
        return_to: Option<&str>,
    ) -> Result<ConnectSession> {
        let mut data = json!({
            "customer_id": customer_id,
            "consent": { "scopes": ["account_details", "transactions_details"] },
        });
        if let Some(url) = return_to {
            data["attempt"] = json!({ "return_to": url });
        }
        self.connect_session("/connect_sessions/create", data).await
    }
}
