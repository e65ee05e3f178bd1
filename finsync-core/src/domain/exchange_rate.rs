//! Exchange rate model

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reference currency of the rate table
pub const RATE_BASE_CURRENCY: &str = "EUR";

/// Units of `currency` per one EUR on `date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub date: NaiveDate,
    pub currency: String,
    pub rate: Decimal,
}
