//! Account domain model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::linked_item::{LinkedItem, ProviderKind};

/// Currency assumed when a provider omits one
pub const DEFAULT_ACCOUNT_CURRENCY: &str = "USD";

/// An account as returned by a provider, before reconciliation.
///
/// Balances follow Plaid's convention: a credit account's `current` is the
/// amount owed, as a positive number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAccount {
    pub account_id: String,
    pub name: String,
    pub official_name: Option<String>,
    /// "depository", "credit", "loan", "investment", "other"
    pub account_type: String,
    pub subtype: Option<String>,
    pub current: Option<Decimal>,
    pub available: Option<Decimal>,
    pub limit: Option<Decimal>,
    pub currency_code: Option<String>,
}

/// A reconciled account stored locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub item_id: String,
    pub provider: ProviderKind,
    pub name: String,
    pub institution: Option<String>,
    pub account_type: String,
    pub subtype: Option<String>,
    /// Sign-adjusted: credit balances are stored negated
    pub current_balance: Option<Decimal>,
    pub limit: Option<Decimal>,
    pub available: Option<Decimal>,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency_code: String,
    /// User-owned flag, never overwritten by a sync
    pub ignored: bool,
    /// User-chosen name shown instead of the provider's, never overwritten by a sync
    pub display_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Build the stored account from a provider record
    pub fn from_raw(raw: &RawAccount, item: &LinkedItem) -> Self {
        let currency_code = raw
            .currency_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_ACCOUNT_CURRENCY)
            .to_uppercase();

        Self {
            account_id: raw.account_id.clone(),
            item_id: item.item_id.clone(),
            provider: item.provider,
            name: raw.name.clone(),
            institution: item.institution_name.clone(),
            account_type: raw.account_type.clone(),
            subtype: raw.subtype.clone(),
            current_balance: raw.current.map(|b| signed_balance(&raw.account_type, b)),
            limit: raw.limit,
            available: raw.available,
            currency_code,
            ignored: false,
            display_name: None,
            updated_at: Utc::now(),
        }
    }

    /// Name to show: the user's override, else the provider's
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

pub fn is_credit_type(account_type: &str) -> bool {
    account_type.eq_ignore_ascii_case("credit")
}

/// Apply the storage sign convention to a provider balance
pub fn signed_balance(account_type: &str, raw: Decimal) -> Decimal {
    if is_credit_type(account_type) {
        -raw
    } else {
        raw
    }
}
