//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the Repository and CurrencyConverter ports
//! - Plaid HTTP client for ProviderAdapter
//! - Salt Edge HTTP client for ProviderAdapter

pub mod duckdb;
pub mod plaid;
pub mod saltedge;

#[cfg(test)]
pub mod plaid_mock;
