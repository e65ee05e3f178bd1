//! Account reconciler - fetch an item's accounts and upsert them concurrently

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{Account, Capability, LinkedItem, ProviderKind};
use crate::ports::{ProviderRegistry, Repository};
use crate::services::link::flag_needs_relogin;

/// A single account that could not be stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountError {
    pub account_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSyncResult {
    pub item_id: String,
    pub upserted: usize,
    pub failed: Vec<AccountError>,
    pub needs_relogin: bool,
}

pub struct AccountService {
    repository: Arc<dyn Repository>,
    providers: ProviderRegistry,
}

impl AccountService {
    pub fn new(repository: Arc<dyn Repository>, providers: ProviderRegistry) -> Self {
        Self {
            repository,
            providers,
        }
    }

    /// Fetch the item's accounts and upsert each one in its own task.
    ///
    /// All tasks are joined before returning; a failed or panicked task is
    /// reported in `failed` and never cancels its siblings.
    pub async fn sync_accounts(&self, item: &LinkedItem) -> Result<AccountSyncResult> {
        let mut result = AccountSyncResult {
            item_id: item.item_id.clone(),
            ..Default::default()
        };

        if item.needs_relogin {
            debug!(item_id = %item.item_id, "skipping account sync, item needs re-login");
            result.needs_relogin = true;
            return Ok(result);
        }

        let adapter = self.providers.get(item.provider)?;
        adapter.ensure_supported(Capability::GetAccounts)?;

        let raw_accounts = match adapter.get_accounts(item.credentials()).await {
            Ok(accounts) => accounts,
            Err(e) if e.is_login_required() => {
                flag_needs_relogin(self.repository.as_ref(), item).await?;
                result.needs_relogin = true;
                return Ok(result);
            }
            Err(e) => return Err(e),
        };

        let item = Arc::new(item.clone());
        let mut handles = Vec::with_capacity(raw_accounts.len());
        for raw in raw_accounts {
            let repository = Arc::clone(&self.repository);
            let item = Arc::clone(&item);
            let account_id = raw.account_id.clone();
            let handle = tokio::spawn(async move {
                let account = Account::from_raw(&raw, &item);
                repository.upsert_account(&account).await
            });
            handles.push((account_id, handle));
        }

        for (account_id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => result.upserted += 1,
                Ok(Err(e)) => {
                    warn!(item_id = %item.item_id, account_id = %account_id, error = %e, "account upsert failed");
                    result.failed.push(AccountError {
                        account_id,
                        message: e.to_string(),
                    });
                }
                Err(join_error) => {
                    warn!(item_id = %item.item_id, account_id = %account_id, "account upsert task aborted");
                    result.failed.push(AccountError {
                        account_id,
                        message: format!("Upsert task failed: {}", join_error),
                    });
                }
            }
        }

        info!(
            item_id = %item.item_id,
            provider = %item.provider,
            upserted = result.upserted,
            failed = result.failed.len(),
            "accounts synced"
        );
        Ok(result)
    }

    /// Stored accounts, optionally restricted to one item
    pub async fn list_accounts(&self, item_id: Option<&str>) -> Result<Vec<Account>> {
        self.repository.list_accounts(item_id).await
    }

    /// Mark an account ignored (or not). Later syncs keep the flag.
    pub async fn set_ignored(
        &self,
        account_id: &str,
        provider: ProviderKind,
        ignored: bool,
    ) -> Result<Account> {
        if !self
            .repository
            .set_account_ignored(account_id, provider, ignored)
            .await?
        {
            return Err(account_not_found(account_id, provider));
        }
        info!(account_id, %provider, ignored, "account ignored flag set");
        self.stored(account_id, provider).await
    }

    /// Give an account a name of the user's choosing; `None` restores the provider's name.
    /// Later syncs keep it.
    pub async fn rename(
        &self,
        account_id: &str,
        provider: ProviderKind,
        display_name: Option<&str>,
    ) -> Result<Account> {
        let display_name = match display_name.map(str::trim) {
            Some("") => return Err(Error::validation("Account name must not be empty")),
            other => other,
        };
        if !self
            .repository
            .set_account_display_name(account_id, provider, display_name)
            .await?
        {
            return Err(account_not_found(account_id, provider));
        }
        info!(account_id, %provider, renamed = display_name.is_some(), "account display name set");
        self.stored(account_id, provider).await
    }

    async fn stored(&self, account_id: &str, provider: ProviderKind) -> Result<Account> {
        self.repository
            .get_account(account_id, provider)
            .await?
            .ok_or_else(|| account_not_found(account_id, provider))
    }
}

fn account_not_found(account_id: &str, provider: ProviderKind) -> Error {
    Error::not_found(format!("{} account '{}'", provider, account_id))
}
