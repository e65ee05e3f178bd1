//! Plaid API client
//!
//! Implements the provider adapter over Plaid's REST API. Every endpoint is a
//! JSON POST authenticated with the `PLAID-CLIENT-ID` / `PLAID-SECRET` headers.
//!
//! API Documentation: https://plaid.com/docs/api/

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::config::PlaidConfig;
use crate::domain::result::{Error, ProviderError, ProviderErrorKind, Result};
use crate::domain::{Capability, Credentials, ProviderKind, RawAccount, RawTransaction};
use crate::ports::{
    ItemInfo, LinkToken, LinkTokenRequest, PaymentCreated, PaymentRequest, ProviderAdapter,
    TokenExchange,
};

/// Page size for /transactions/get (Plaid maximum)
const TRANSACTIONS_PAGE_SIZE: usize = 500;

const REQUEST_TIMEOUT_SECS: u64 = 120;

const PLAID_CAPABILITIES: &[Capability] = &[
    Capability::ExchangePublicToken,
    Capability::CreateLinkToken,
    Capability::CreatePublicToken,
    Capability::GetItem,
    Capability::GetAccounts,
    Capability::GetBalance,
    Capability::GetTransactions,
    Capability::GetIdentity,
    Capability::GetAuth,
    Capability::GetInvestmentTransactions,
    Capability::GetHoldings,
    Capability::CreateAssetReport,
    Capability::GetAssetReport,
    Capability::GetAssetReportPdf,
    Capability::CreatePayment,
    Capability::GetPayment,
];

// =============================================================================
// API Response Models
// =============================================================================

/// Plaid error body
#[derive(Debug, Clone, Default, Deserialize)]
struct PlaidErrorBody {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Debug, Deserialize)]
struct LinkTokenResponse {
    link_token: String,
    #[serde(default)]
    expiration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicTokenCreateResponse {
    public_token: String,
}

#[derive(Debug, Deserialize)]
struct ItemGetResponse {
    item: PlaidItem,
}

#[derive(Debug, Deserialize)]
struct PlaidItem {
    item_id: String,
    #[serde(default)]
    institution_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstitutionResponse {
    institution: PlaidInstitution,
}

#[derive(Debug, Deserialize)]
struct PlaidInstitution {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<PlaidAccount>,
}

/// Plaid account from /accounts/get
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaidAccount {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
    #[serde(rename = "type")]
    pub account_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub balances: PlaidBalances,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaidBalances {
    #[serde(default, deserialize_with = "deserialize_optional_amount")]
    pub current: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_amount")]
    pub available: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_amount")]
    pub limit: Option<Decimal>,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
    #[serde(default)]
    pub unofficial_currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    transactions: Vec<PlaidTransaction>,
    total_transactions: usize,
}

/// Plaid transaction from /transactions/get
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaidTransaction {
    pub transaction_id: String,
    pub account_id: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: Decimal,
    pub date: String,
    pub name: String,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
    #[serde(default)]
    pub unofficial_currency_code: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Deserialize)]
struct AssetReportCreateResponse {
    asset_report_token: String,
}

#[derive(Debug, Deserialize)]
struct RecipientCreateResponse {
    recipient_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentCreateResponse {
    payment_id: String,
    #[serde(default)]
    status: Option<String>,
}

/// Deserialize a JSON number (or numeric string) into a Decimal
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
    use serde::de::Error as _;
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => parse_amount(&v)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid amount: {}", v))),
    }
}

pub(crate) fn parse_amount(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => n.to_string().parse::<Decimal>().ok(),
        JsonValue::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    }
}

// =============================================================================
// Error classification
// =============================================================================

/// Map a Plaid error response onto a normalized provider error
pub fn classify_plaid_error(status: StatusCode, body: &[u8]) -> ProviderError {
    let parsed: PlaidErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let code = parsed.error_code.clone().unwrap_or_default();
    let error_type = parsed.error_type.clone().unwrap_or_default();

    let kind = match code.as_str() {
        "ITEM_LOGIN_REQUIRED" => ProviderErrorKind::ItemLoginRequired,
        "PRODUCT_NOT_READY" => ProviderErrorKind::ProductNotReady,
        "INVALID_PUBLIC_TOKEN" | "INVALID_ACCESS_TOKEN" | "INVALID_API_KEYS" => ProviderErrorKind::Auth,
        _ if error_type == "RATE_LIMIT_EXCEEDED" || status == StatusCode::TOO_MANY_REQUESTS => {
            ProviderErrorKind::RateLimited
        }
        _ if status == StatusCode::UNAUTHORIZED => ProviderErrorKind::Auth,
        _ if error_type == "API_ERROR" || error_type == "INSTITUTION_ERROR" || status.is_server_error() => {
            ProviderErrorKind::Unavailable
        }
        _ => ProviderErrorKind::Unknown,
    };

    let message = parsed
        .error_message
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    let error = ProviderError::new(ProviderKind::Plaid, kind, message);
    if code.is_empty() {
        error
    } else {
        error.with_code(code)
    }
}

/// Plaid takes payment amounts as JSON numbers
fn payment_value(amount: Decimal) -> Result<f64> {
    amount
        .to_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::validation(format!("Payment amount {} is not representable", amount)))
}

/// Map transport failures (timeouts, refused connections) onto provider errors
pub(crate) fn map_request_error(provider: ProviderKind, error: reqwest::Error) -> Error {
    let message = if error.is_timeout() {
        format!("Connection timed out after {} seconds", REQUEST_TIMEOUT_SECS)
    } else if error.is_connect() {
        format!("Unable to connect to {} servers", provider)
    } else {
        format!("{} request failed: {}", provider, error)
    };
    Error::provider(provider, ProviderErrorKind::Unavailable, message)
}

// =============================================================================
// Plaid provider
// =============================================================================

/// Plaid adapter
#[derive(Debug)]
pub struct PlaidProvider {
    client: Client,
    base_url: String,
    client_id: String,
    secret: String,
    client_name: String,
    products: Vec<String>,
    country_codes: Vec<String>,
    redirect_uri: Option<String>,
}

impl PlaidProvider {
    pub fn new(config: &PlaidConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::Config(
                "Plaid client id and secret are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.resolved_base_url().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
            client_name: config.client_name.clone(),
            products: config.products.clone(),
            country_codes: config.country_codes.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    async fn send(&self, path: &str, body: &JsonValue) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = "plaid", path, "request");

        let response = self
            .client
            .post(&url)
            .header("PLAID-CLIENT-ID", &self.client_id)
            .header("PLAID-SECRET", &self.secret)
            .json(body)
            .send()
            .await
            .map_err(|e| map_request_error(ProviderKind::Plaid, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_request_error(ProviderKind::Plaid, e))?;

        if !status.is_success() {
            let error = classify_plaid_error(status, &bytes);
            debug!(provider = "plaid", path, kind = ?error.kind, "request failed");
            return Err(error.into());
        }
        Ok(bytes.to_vec())
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: JsonValue) -> Result<T> {
        let bytes = self.send(path, &body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::MalformedResponse(format!("Plaid {}: {}", path, e)))
    }

    async fn fetch_institution_name(&self, institution_id: &str) -> Result<String> {
        let response: InstitutionResponse = self
            .post(
                "/institutions/get_by_id",
                json!({
                    "institution_id": institution_id,
                    "country_codes": self.country_codes,
                }),
            )
            .await?;
        Ok(response.institution.name)
    }

    fn map_account(account: PlaidAccount) -> RawAccount {
        RawAccount {
            account_id: account.account_id,
            name: account.name,
            official_name: account.official_name,
            account_type: account.account_type,
            subtype: account.subtype,
            current: account.balances.current,
            available: account.balances.available,
            limit: account.balances.limit,
            currency_code: account
                .balances
                .iso_currency_code
                .or(account.balances.unofficial_currency_code),
        }
    }

    fn map_transaction(tx: PlaidTransaction) -> Result<RawTransaction> {
        let date = NaiveDate::parse_from_str(&tx.date, "%Y-%m-%d").map_err(|e| {
            Error::MalformedResponse(format!(
                "Plaid transaction {} has invalid date '{}': {}",
                tx.transaction_id, tx.date, e
            ))
        })?;

        Ok(RawTransaction {
            transaction_id: tx.transaction_id,
            account_id: tx.account_id,
            date,
            name: tx.name,
            amount: tx.amount,
            currency_code: tx.iso_currency_code.or(tx.unofficial_currency_code),
            category_code: tx.category_id,
            pending: tx.pending,
        })
    }
}

#[async_trait]
impl ProviderAdapter for PlaidProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Plaid
    }

    fn capabilities(&self) -> &'static [Capability] {
        PLAID_CAPABILITIES
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange> {
        let response: ExchangeResponse = self
            .post(
                "/item/public_token/exchange",
                json!({ "public_token": public_token }),
            )
            .await?;
        Ok(TokenExchange {
            access_token: response.access_token,
            item_id: response.item_id,
        })
    }

    async fn create_link_token(&self, request: &LinkTokenRequest) -> Result<LinkToken> {
        let mut body = json!({
            "client_name": self.client_name,
            "language": "en",
            "country_codes": self.country_codes,
            "user": { "client_user_id": request.client_user_id },
        });
        // Update mode re-authenticates the item's existing products; Plaid
        // rejects a products list alongside an access token.
        match &request.access_token {
            Some(access_token) => body["access_token"] = json!(access_token),
            None => body["products"] = json!(self.products),
        }
        if let Some(uri) = &self.redirect_uri {
            body["redirect_uri"] = json!(uri);
        }
        if let Some(payment_id) = &request.payment_id {
            body["payment_initiation"] = json!({ "payment_id": payment_id });
        }

        let response: LinkTokenResponse = self.post("/link/token/create", body).await?;
        Ok(LinkToken {
            link_token: response.link_token,
            expiration: response.expiration,
        })
    }

    async fn create_public_token(&self, credentials: Credentials<'_>) -> Result<String> {
        let response: PublicTokenCreateResponse = self
            .post(
                "/item/public_token/create",
                json!({ "access_token": credentials.access_token }),
            )
            .await?;
        Ok(response.public_token)
    }

    async fn get_item(&self, credentials: Credentials<'_>) -> Result<ItemInfo> {
        let response: ItemGetResponse = self
            .post(
                "/item/get",
                json!({ "access_token": credentials.access_token }),
            )
            .await?;

        let institution_name = match &response.item.institution_id {
            Some(id) => Some(self.fetch_institution_name(id).await?),
            None => None,
        };

        Ok(ItemInfo {
            item_id: response.item.item_id,
            institution_id: response.item.institution_id,
            institution_name,
        })
    }

    async fn get_accounts(&self, credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        let response: AccountsResponse = self
            .post(
                "/accounts/get",
                json!({ "access_token": credentials.access_token }),
            )
            .await?;
        Ok(response.accounts.into_iter().map(Self::map_account).collect())
    }

    async fn get_balances(&self, credentials: Credentials<'_>) -> Result<Vec<RawAccount>> {
        let response: AccountsResponse = self
            .post(
                "/accounts/balance/get",
                json!({ "access_token": credentials.access_token }),
            )
            .await?;
        Ok(response.accounts.into_iter().map(Self::map_account).collect())
    }

    async fn get_transactions(
        &self,
        credentials: Credentials<'_>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        let mut transactions = Vec::new();

        loop {
            let page: TransactionsResponse = self
                .post(
                    "/transactions/get",
                    json!({
                        "access_token": credentials.access_token,
                        "start_date": start.format("%Y-%m-%d").to_string(),
                        "end_date": end.format("%Y-%m-%d").to_string(),
                        "options": {
                            "count": TRANSACTIONS_PAGE_SIZE,
                            "offset": transactions.len(),
                        },
                    }),
                )
                .await?;

            let received = page.transactions.len();
            for tx in page.transactions {
                transactions.push(Self::map_transaction(tx)?);
            }

            debug!(
                provider = "plaid",
                item_id = credentials.item_id,
                fetched = transactions.len(),
                total = page.total_transactions,
                "transactions page"
            );

            if received == 0 || transactions.len() >= page.total_transactions {
                break;
            }
        }

        Ok(transactions)
    }

    async fn get_identity(&self, credentials: Credentials<'_>) -> Result<JsonValue> {
        self.post(
            "/identity/get",
            json!({ "access_token": credentials.access_token }),
        )
        .await
    }

    async fn get_auth(&self, credentials: Credentials<'_>) -> Result<JsonValue> {
        self.post(
            "/auth/get",
            json!({ "access_token": credentials.access_token }),
        )
        .await
    }

    async fn get_investment_transactions(
        &self,
        credentials: Credentials<'_>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<JsonValue> {
        self.post(
            "/investments/transactions/get",
            json!({
                "access_token": credentials.access_token,
                "start_date": start.format("%Y-%m-%d").to_string(),
                "end_date": end.format("%Y-%m-%d").to_string(),
            }),
        )
        .await
    }

    async fn get_holdings(&self, credentials: Credentials<'_>) -> Result<JsonValue> {
        self.post(
            "/investments/holdings/get",
            json!({ "access_token": credentials.access_token }),
        )
        .await
    }

    async fn create_asset_report(&self, access_token: &str, days_requested: u32) -> Result<String> {
        let response: AssetReportCreateResponse = self
            .post(
                "/asset_report/create",
                json!({
                    "access_tokens": [access_token],
                    "days_requested": days_requested,
                }),
            )
            .await?;
        Ok(response.asset_report_token)
    }

    async fn get_asset_report(&self, report_token: &str) -> Result<JsonValue> {
        let mut response: JsonValue = self
            .post(
                "/asset_report/get",
                json!({ "asset_report_token": report_token }),
            )
            .await?;

        match response.get_mut("report") {
            Some(report) => Ok(report.take()),
            None => Err(Error::MalformedResponse(
                "Plaid /asset_report/get: missing report".to_string(),
            )),
        }
    }

    async fn get_asset_report_pdf(&self, report_token: &str) -> Result<Vec<u8>> {
        self.send(
            "/asset_report/pdf/get",
            &json!({ "asset_report_token": report_token }),
        )
        .await
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentCreated> {
        let value = payment_value(request.amount)?;
        let mut recipient = json!({
            "name": request.recipient_name,
            "iban": request.iban,
        });
        if let Some(address) = &request.address {
            recipient["address"] = json!({
                "street": address.street,
                "city": address.city,
                "postal_code": address.postal_code,
                "country": address.country,
            });
        }

        let recipient: RecipientCreateResponse = self
            .post("/payment_initiation/recipient/create", recipient)
            .await?;

        let payment: PaymentCreateResponse = self
            .post(
                "/payment_initiation/payment/create",
                json!({
                    "recipient_id": recipient.recipient_id,
                    "reference": request.reference,
                    "amount": {
                        "currency": request.currency,
                        "value": value,
                    },
                }),
            )
            .await?;

        Ok(PaymentCreated {
            recipient_id: recipient.recipient_id,
            payment_id: payment.payment_id,
            status: payment.status,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<JsonValue> {
        self.post(
            "/payment_initiation/payment/get",
            json!({ "payment_id": payment_id }),
        )
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
