//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
mod capability;
mod category;
mod exchange_rate;
mod linked_item;
mod report;
mod transaction;
pub mod result;

pub use account::{is_credit_type, signed_balance, Account, RawAccount, DEFAULT_ACCOUNT_CURRENCY};
pub use capability::Capability;
pub use category::{Category, UNCATEGORIZED_ID, UNCATEGORIZED_NAME};
pub use exchange_rate::{ExchangeRate, RATE_BASE_CURRENCY};
pub use linked_item::{Credentials, LinkedItem, ProviderKind};
pub use report::{AssetReport, AssetReportJob, JobState};
pub use transaction::{RawTransaction, Transaction};
