//! Transaction domain model

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::linked_item::ProviderKind;

/// A transaction as returned by a provider.
///
/// `amount` follows Plaid's convention: money leaving the account is positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: String,
    pub account_id: String,
    pub date: NaiveDate,
    pub name: String,
    pub amount: Decimal,
    pub currency_code: Option<String>,
    /// Provider category code used for mapping (Plaid `category_id`, Salt Edge `category`)
    pub category_code: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

impl RawTransaction {
    /// Stored amount: inflows positive, outflows negative
    pub fn stored_amount(&self) -> Decimal {
        -self.amount
    }
}

/// An imported transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique import key
    pub transaction_id: String,
    pub account_id: String,
    pub provider: ProviderKind,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub currency_code: String,
    /// Amount in the base currency as of `date`, fixed at import
    pub normalized_amount: Decimal,
    pub category_id: i64,
    pub category_name: String,
    pub account_name_snapshot: Option<String>,
    pub pending: bool,
    pub imported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_amount_flips_sign() {
        let raw = RawTransaction {
            transaction_id: "t1".into(),
            account_id: "a1".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            name: "Coffee".into(),
            amount: "4.50".parse().unwrap(),
            currency_code: Some("USD".into()),
            category_code: None,
            pending: false,
        };
        assert_eq!(raw.stored_amount(), "-4.50".parse::<Decimal>().unwrap());
    }
}
