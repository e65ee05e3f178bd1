//! Link service - token exchange and linked item lifecycle
//!
//! Turns a short-lived public token (or a Salt Edge connection id) into a
//! persisted `LinkedItem`. Exchanging the same token again refreshes the same
//! row, keyed by item_id.
//!
//! An item flagged `needs_relogin` is recovered through `refresh_connection`:
//! Salt Edge opens a reconnect session, Plaid gets an update-mode link token
//! for the same item. Exchanging the resulting public token, or calling
//! `confirm_relogin` once the user has finished, clears the flag.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Capability, Credentials, LinkedItem, ProviderKind};
use crate::ports::{ConnectSession, LinkToken, LinkTokenRequest, ProviderRegistry, Repository};

/// Outcome of a successful token exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub access_token: String,
    pub item_id: String,
    pub institution_name: Option<String>,
    pub provider: ProviderKind,
    /// Non-fatal problems, e.g. a failed institution lookup
    pub warnings: Vec<String>,
}

/// How the user re-authenticates an existing item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RelinkSession {
    /// Browser session hosted by the provider
    Connect(ConnectSession),
    /// Link token that opens the client widget in update mode
    UpdateLink(LinkToken),
}

pub struct LinkService {
    repository: Arc<dyn Repository>,
    providers: ProviderRegistry,
}

impl LinkService {
    pub fn new(repository: Arc<dyn Repository>, providers: ProviderRegistry) -> Self {
        Self {
            repository,
            providers,
        }
    }

    /// Exchange a public token for a persistent access token and store the item
    pub async fn exchange_public_token(
        &self,
        provider: ProviderKind,
        public_token: &str,
        institution_name: Option<&str>,
    ) -> Result<ExchangeResult> {
        let adapter = self.providers.get(provider)?;
        adapter.ensure_supported(Capability::ExchangePublicToken)?;

        let exchange = adapter.exchange_public_token(public_token).await?;
        let mut warnings = Vec::new();

        let institution = match institution_name {
            Some(name) => Some(name.to_string()),
            None if adapter.supports(Capability::GetItem) => {
                let credentials = Credentials::new(&exchange.item_id, &exchange.access_token);
                match adapter.get_item(credentials).await {
                    Ok(info) => info.institution_name,
                    Err(e) => {
                        warn!(item_id = %exchange.item_id, %provider, error = %e, "institution lookup failed");
                        warnings.push(format!("Could not look up institution: {}", e));
                        None
                    }
                }
            }
            None => None,
        };

        let item = self
            .store_item(provider, &exchange.item_id, &exchange.access_token, institution)
            .await?;
        info!(item_id = %item.item_id, %provider, "linked item stored");

        Ok(ExchangeResult {
            access_token: item.access_token,
            item_id: item.item_id,
            institution_name: item.institution_name,
            provider,
            warnings,
        })
    }

    /// Register an existing Salt Edge connection as a linked item.
    ///
    /// The connection id serves as both item id and access credential.
    pub async fn register_connection(
        &self,
        connection_id: &str,
        institution_name: Option<&str>,
    ) -> Result<LinkedItem> {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return Err(Error::validation("Connection id must not be empty"));
        }
        let adapter = self.providers.get(ProviderKind::SaltEdge)?;
        adapter.ensure_supported(Capability::GetAccounts)?;

        let item = self
            .store_item(
                ProviderKind::SaltEdge,
                connection_id,
                connection_id,
                institution_name.map(String::from),
            )
            .await?;
        info!(item_id = %item.item_id, "salt edge connection registered");
        Ok(item)
    }

    /// Create a link token for the provider's client-side widget.
    ///
    /// A fresh client user id is generated when none is given.
    pub async fn create_link_token(
        &self,
        provider: ProviderKind,
        client_user_id: Option<&str>,
        payment_id: Option<&str>,
    ) -> Result<LinkToken> {
        let adapter = self.providers.get(provider)?;
        adapter.ensure_supported(Capability::CreateLinkToken)?;

        let request = LinkTokenRequest {
            client_user_id: client_user_id
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            payment_id: payment_id.map(String::from),
            access_token: None,
        };
        adapter.create_link_token(&request).await
    }

    /// Start re-authentication of an existing item.
    ///
    /// Providers with hosted reconnect sessions return one; otherwise a link
    /// token in update mode is created for the item's access token.
    pub async fn refresh_connection(
        &self,
        item_id: &str,
        return_to: Option<&str>,
    ) -> Result<RelinkSession> {
        let item = self.get_item(item_id).await?;
        let adapter = self.providers.get(item.provider)?;

        if adapter.supports(Capability::RefreshConnectionInteractive) {
            let session = adapter
                .refresh_connection_interactive(item.credentials(), return_to)
                .await?;
            return Ok(RelinkSession::Connect(session));
        }
        if !adapter.supports(Capability::CreateLinkToken) {
            return Err(Error::unsupported(
                item.provider,
                Capability::RefreshConnectionInteractive,
            ));
        }

        let request = LinkTokenRequest {
            client_user_id: Uuid::new_v4().to_string(),
            payment_id: None,
            access_token: Some(item.access_token.clone()),
        };
        let token = adapter.create_link_token(&request).await?;
        info!(item_id = %item.item_id, provider = %item.provider, "update-mode link token created");
        Ok(RelinkSession::UpdateLink(token))
    }

    /// One-time public token for an existing item
    pub async fn create_public_token(&self, item_id: &str) -> Result<String> {
        let item = self.get_item(item_id).await?;
        let adapter = self.providers.get(item.provider)?;
        adapter.ensure_supported(Capability::CreatePublicToken)?;
        adapter.create_public_token(item.credentials()).await
    }

    /// Verify the stored credential against the provider and clear `needs_relogin`.
    ///
    /// A provider that still rejects the login leaves the flag set and the
    /// error is returned.
    pub async fn confirm_relogin(&self, item_id: &str) -> Result<LinkedItem> {
        let mut item = self.get_item(item_id).await?;
        let adapter = self.providers.get(item.provider)?;

        if adapter.supports(Capability::GetItem) {
            adapter.get_item(item.credentials()).await?;
        } else {
            adapter.ensure_supported(Capability::GetAccounts)?;
            adapter.get_accounts(item.credentials()).await?;
        }

        if item.needs_relogin {
            item.needs_relogin = false;
            item.updated_at = Utc::now();
            self.repository.upsert_linked_item(&item).await?;
            info!(item_id = %item.item_id, provider = %item.provider, "re-login confirmed");
        }
        Ok(item)
    }

    /// Open an interactive session to create a new connection
    pub async fn create_connection(
        &self,
        provider: ProviderKind,
        customer_id: &str,
        return_to: Option<&str>,
    ) -> Result<ConnectSession> {
        let adapter = self.providers.get(provider)?;
        adapter.ensure_supported(Capability::CreateConnectionInteractive)?;
        adapter
            .create_connection_interactive(customer_id, return_to)
            .await
    }

    pub async fn get_item(&self, item_id: &str) -> Result<LinkedItem> {
        self.repository
            .get_linked_item(item_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Linked item '{}'", item_id)))
    }

    pub async fn list_items(&self) -> Result<Vec<LinkedItem>> {
        self.repository.list_linked_items().await
    }

    /// Insert a new item or refresh the credential of an existing one.
    ///
    /// A refresh clears `needs_relogin` and keeps `created_at` and
    /// `last_synced_at`.
    async fn store_item(
        &self,
        provider: ProviderKind,
        item_id: &str,
        access_token: &str,
        institution_name: Option<String>,
    ) -> Result<LinkedItem> {
        let item = match self.repository.get_linked_item(item_id).await? {
            Some(mut existing) => {
                existing.access_token = access_token.to_string();
                existing.provider = provider;
                existing.needs_relogin = false;
                if institution_name.is_some() {
                    existing.institution_name = institution_name;
                }
                existing.updated_at = Utc::now();
                existing
            }
            None => LinkedItem::new(provider, item_id, access_token, institution_name),
        };

        self.repository.upsert_linked_item(&item).await?;
        Ok(item)
    }
}

/// Persist `needs_relogin = true` for an item the provider rejected.
///
/// Reloads the stored row first so a concurrent update is not overwritten
/// with stale fields.
pub(crate) async fn flag_needs_relogin(
    repository: &dyn Repository,
    item: &LinkedItem,
) -> Result<()> {
    let mut stored = repository
        .get_linked_item(&item.item_id)
        .await?
        .unwrap_or_else(|| item.clone());
    stored.mark_needs_relogin();
    repository.upsert_linked_item(&stored).await?;
    warn!(item_id = %item.item_id, provider = %item.provider, "item requires re-login");
    Ok(())
}
