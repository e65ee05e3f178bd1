//! Exchange rate import from CSV
//!
//! Expects a header row `date,currency,rate` where `rate` is units of
//! `currency` per one EUR.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::{Error, Result};
use crate::domain::ExchangeRate;

#[derive(Debug, Deserialize)]
struct RateRow {
    date: String,
    currency: String,
    rate: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateImportResult {
    pub imported: usize,
    /// One message per rejected row, with its line number
    pub errors: Vec<String>,
}

pub struct RateService {
    repository: Arc<DuckDbRepository>,
}

impl RateService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    pub fn import_csv(&self, path: &Path) -> Result<RateImportResult> {
        let file = std::fs::File::open(path)?;
        self.import_reader(file)
    }

    /// Parse and store rates. Bad rows are reported, good rows still stored.
    pub fn import_reader<R: Read>(&self, reader: R) -> Result<RateImportResult> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut result = RateImportResult::default();
        let mut rates = Vec::new();
        for (index, record) in csv_reader.deserialize::<RateRow>().enumerate() {
            // Header is line 1
            let line = index + 2;
            let row = match record {
                Ok(row) => row,
                Err(e) => {
                    result.errors.push(format!("line {}: {}", line, e));
                    continue;
                }
            };
            match parse_row(&row) {
                Ok(rate) => rates.push(rate),
                Err(e) => result.errors.push(format!("line {}: {}", line, e)),
            }
        }

        result.imported = self.repository.upsert_exchange_rates(&rates)?;
        info!(imported = result.imported, rejected = result.errors.len(), "exchange rates imported");
        Ok(result)
    }
}

fn parse_row(row: &RateRow) -> Result<ExchangeRate> {
    let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
        .map_err(|_| Error::validation(format!("invalid date '{}'", row.date)))?;

    let currency = row.currency.to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::validation(format!("invalid currency '{}'", row.currency)));
    }

    let rate: Decimal = row
        .rate
        .parse()
        .map_err(|_| Error::validation(format!("invalid rate '{}'", row.rate)))?;
    if rate <= Decimal::ZERO {
        return Err(Error::validation(format!("rate must be positive, got {}", rate)));
    }

    Ok(ExchangeRate {
        date,
        currency,
        rate,
    })
}
