//! Currency conversion port

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::result::Result;

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    /// Convert `amount` from `source` into `target` using the rate in effect on `as_of`.
    ///
    /// Fails with `Error::Conversion` when either currency has no rate on or
    /// before that date.
    async fn normalize(
        &self,
        amount: Decimal,
        source: &str,
        target: &str,
        as_of: NaiveDate,
    ) -> Result<Decimal>;
}
