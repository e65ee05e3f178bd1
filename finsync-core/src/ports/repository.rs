//! Repository port - database abstraction

use async_trait::async_trait;

use crate::domain::result::Result;
use crate::domain::{Account, Category, LinkedItem, ProviderKind, Transaction};

/// Database repository abstraction
///
/// This trait defines all persistence operations used by the sync engine.
/// Row-level upserts must be atomic; the account reconciler calls them from
/// concurrent tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // === Linked items ===

    async fn get_linked_item(&self, item_id: &str) -> Result<Option<LinkedItem>>;

    async fn list_linked_items(&self) -> Result<Vec<LinkedItem>>;

    /// Insert or replace the item keyed by item_id
    async fn upsert_linked_item(&self, item: &LinkedItem) -> Result<()>;

    // === Accounts ===

    /// Insert or update keyed by (account_id, provider), preserving `ignored` and `display_name`
    async fn upsert_account(&self, account: &Account) -> Result<()>;

    async fn get_account(&self, account_id: &str, provider: ProviderKind) -> Result<Option<Account>>;

    /// All accounts, or only those of one item
    async fn list_accounts(&self, item_id: Option<&str>) -> Result<Vec<Account>>;

    /// Set the user-owned ignored flag. Returns false when no such account exists.
    async fn set_account_ignored(
        &self,
        account_id: &str,
        provider: ProviderKind,
        ignored: bool,
    ) -> Result<bool>;

    /// Set or clear the user's name for an account. Returns false when no such account exists.
    async fn set_account_display_name(
        &self,
        account_id: &str,
        provider: ProviderKind,
        display_name: Option<&str>,
    ) -> Result<bool>;

    // === Transactions ===

    async fn transaction_exists(&self, transaction_id: &str) -> Result<bool>;

    /// Insert if absent. Returns whether a row was written.
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<bool>;

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>>;

    // === Categories ===

    /// Mapping for a provider category code, if one exists
    async fn lookup_category(&self, provider: ProviderKind, code: &str) -> Result<Option<Category>>;
}
