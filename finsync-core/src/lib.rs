//! finsync core - account linking and transaction synchronization
//!
//! This crate implements the engine following hexagonal architecture:
//!
//! - **domain**: Core entities (LinkedItem, Account, Transaction, etc.)
//! - **ports**: Trait definitions for external dependencies (Repository, ProviderAdapter)
//! - **services**: Business logic orchestration
//! - **adapters**: Concrete implementations (DuckDB, Plaid, Salt Edge)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use adapters::duckdb::DuckDbRepository;
use adapters::plaid::PlaidProvider;
use adapters::saltedge::SaltEdgeProvider;
use config::Config;
use ports::{CurrencyConverter, ProviderRegistry, Repository};
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult, ProviderError, ProviderErrorKind};
pub use domain::{Account, AssetReport, LinkedItem, ProviderKind, RawTransaction, Transaction};

/// Main context for finsync operations
///
/// Holds the database, configuration, the configured providers and all
/// services built on top of them.
pub struct FinsyncContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub providers: ProviderRegistry,
    pub link_service: LinkService,
    pub account_service: AccountService,
    pub sync_service: TransactionSyncService,
    pub report_service: ReportService,
    pub product_service: ProductService,
    pub rate_service: RateService,
}

impl FinsyncContext {
    /// Open the data directory: load settings, open finsync.duckdb, run
    /// migrations and register every configured provider
    pub fn new(dir: &Path) -> Result<Self> {
        let config = Config::load(dir)?;

        let db_path = dir.join("finsync.duckdb");
        let repository = Arc::new(
            DuckDbRepository::new(&db_path)
                .with_context(|| format!("Failed to open {}", db_path.display()))?,
        );
        repository.ensure_schema().context("Failed to migrate database")?;

        let providers = build_registry(&config)?;
        Ok(Self::from_parts(config, repository, providers))
    }

    /// Assemble a context from already constructed parts
    pub fn from_parts(config: Config, repository: Arc<DuckDbRepository>, providers: ProviderRegistry) -> Self {
        let store: Arc<dyn Repository> = repository.clone();
        let converter: Arc<dyn CurrencyConverter> = repository.clone();

        Self {
            link_service: LinkService::new(Arc::clone(&store), providers.clone()),
            account_service: AccountService::new(Arc::clone(&store), providers.clone()),
            sync_service: TransactionSyncService::new(
                Arc::clone(&store),
                converter,
                providers.clone(),
                config.base_currency.clone(),
            ),
            report_service: ReportService::new(providers.clone(), PollerConfig::from(config.poller)),
            product_service: ProductService::new(store, providers.clone()),
            rate_service: RateService::new(Arc::clone(&repository)),
            config,
            repository,
            providers,
        }
    }
}

/// Register the providers whose credentials are present
pub fn build_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    if config.plaid.is_configured() {
        registry.register(Arc::new(PlaidProvider::new(&config.plaid)?));
    } else {
        debug!("plaid credentials not set, provider disabled");
    }
    if config.salt_edge.is_configured() {
        registry.register(Arc::new(SaltEdgeProvider::new(&config.salt_edge)?));
    } else {
        debug!("salt edge credentials not set, provider disabled");
    }
    Ok(registry)
}
