//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on one stage of the linking and sync lifecycle.

mod accounts;
pub mod activity;
mod link;
pub mod migration;
mod products;
mod rates;
mod report;
mod sync;

pub use accounts::{AccountError, AccountService, AccountSyncResult};
pub use activity::{
    Activity, ActivityCounts, ActivityEntry, ActivityFilter, ActivityKind, ActivityLog, ActivitySummary,
    ItemActivity,
};
pub use link::{ExchangeResult, LinkService, RelinkSession};
pub use migration::{MigrationResult, MigrationService};
pub use products::{PaymentInitiation, ProductService, INVESTMENT_WINDOW_DAYS};
pub use rates::{RateImportResult, RateService};
pub use report::{PollerConfig, ReportService};
pub use sync::{epoch_floor, CheckResult, ImportResult, SyncWindow, TransactionSyncService, TxError, LOOKBACK_DAYS};
