//! Token exchange and linked item lifecycle tests
//!
//! Run with: cargo test --test link_test -- --nocapture

mod common;

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use common::*;
use finsync_core::domain::result::{Error, ProviderErrorKind};
use finsync_core::domain::{Capability, ProviderKind};
use finsync_core::ports::{ProviderRegistry, Repository};
use finsync_core::services::{LinkService, RelinkSession};

/// Link-widget provider: no hosted reconnect sessions
const PLAID: &[Capability] = &[
    Capability::ExchangePublicToken,
    Capability::CreateLinkToken,
    Capability::CreatePublicToken,
    Capability::GetItem,
    Capability::GetAccounts,
    Capability::GetBalance,
    Capability::GetTransactions,
];

fn setup() -> (TempDir, Arc<finsync_core::adapters::duckdb::DuckDbRepository>, Arc<ScriptedProvider>, LinkService) {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(&dir);
    let provider = Arc::new(ScriptedProvider::new(ProviderKind::Plaid).with_capabilities(PLAID));
    let store: Arc<dyn Repository> = repo.clone();
    let service = LinkService::new(store, ProviderRegistry::new().with(provider.clone()));
    (dir, repo, provider, service)
}

#[tokio::test]
async fn test_exchanging_twice_keeps_one_item() {
    let (_dir, repo, _provider, service) = setup();

    let first = service
        .exchange_public_token(ProviderKind::Plaid, "public-abc", None)
        .await
        .unwrap();
    assert_eq!(first.item_id, "item-abc");
    assert_eq!(first.access_token, "access-abc");
    assert_eq!(first.institution_name.as_deref(), Some("First Platypus Bank"));
    assert!(first.warnings.is_empty());

    let second = service
        .exchange_public_token(ProviderKind::Plaid, "public-abc", None)
        .await
        .unwrap();
    assert_eq!(second.item_id, first.item_id);

    let items = repo.list_linked_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id, "item-abc");
}

#[tokio::test]
async fn test_reexchange_clears_relogin_and_keeps_last_sync() {
    let (_dir, repo, _provider, service) = setup();
    service
        .exchange_public_token(ProviderKind::Plaid, "public-abc", Some("My Bank"))
        .await
        .unwrap();

    let mut item = repo.get_linked_item("item-abc").await.unwrap().unwrap();
    let synced = Utc::now();
    item.mark_synced(synced);
    item.mark_needs_relogin();
    repo.upsert_linked_item(&item).await.unwrap();

    service
        .exchange_public_token(ProviderKind::Plaid, "public-abc", None)
        .await
        .unwrap();

    let item = repo.get_linked_item("item-abc").await.unwrap().unwrap();
    assert!(!item.needs_relogin);
    assert_eq!(
        item.last_synced_at.map(|t| t.timestamp()),
        Some(synced.timestamp())
    );
}

async fn link_item_needing_relogin(
    repo: &finsync_core::adapters::duckdb::DuckDbRepository,
    service: &LinkService,
) {
    service
        .exchange_public_token(ProviderKind::Plaid, "public-abc", Some("My Bank"))
        .await
        .unwrap();
    let mut item = repo.get_linked_item("item-abc").await.unwrap().unwrap();
    item.mark_needs_relogin();
    repo.upsert_linked_item(&item).await.unwrap();
}

#[tokio::test]
async fn test_update_mode_relink_clears_relogin() {
    let (_dir, repo, provider, service) = setup();
    link_item_needing_relogin(&repo, &service).await;

    let session = service.refresh_connection("item-abc", None).await.unwrap();
    let token = match session {
        RelinkSession::UpdateLink(token) => token,
        RelinkSession::Connect(_) => panic!("expected an update-mode link token"),
    };
    assert!(token.link_token.starts_with("link-sandbox-update-"));
    {
        let requests = provider.link_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].access_token.as_deref(), Some("access-abc"));
        assert!(requests[0].payment_id.is_none());
    }

    // After the user signs in again, the item's new public token is exchanged
    let public_token = service.create_public_token("item-abc").await.unwrap();
    assert_eq!(public_token, "public-abc");
    let exchanged = service
        .exchange_public_token(ProviderKind::Plaid, &public_token, None)
        .await
        .unwrap();
    assert_eq!(exchanged.item_id, "item-abc");

    let item = repo.get_linked_item("item-abc").await.unwrap().unwrap();
    assert!(!item.needs_relogin);
    assert_eq!(repo.list_linked_items().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_confirm_relogin_clears_flag() {
    let (_dir, repo, _provider, service) = setup();
    link_item_needing_relogin(&repo, &service).await;

    let item = service.confirm_relogin("item-abc").await.unwrap();
    assert!(!item.needs_relogin);
    assert!(!repo.get_linked_item("item-abc").await.unwrap().unwrap().needs_relogin);
}

#[tokio::test]
async fn test_failed_confirm_keeps_relogin_flag() {
    let (_dir, repo, provider, service) = setup();
    link_item_needing_relogin(&repo, &service).await;
    *provider.item_lookup_fails.lock().unwrap() = true;

    let err = service.confirm_relogin("item-abc").await.unwrap_err();
    assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Unavailable));
    assert!(repo.get_linked_item("item-abc").await.unwrap().unwrap().needs_relogin);
}

#[tokio::test]
async fn test_refresh_unknown_item_is_not_found() {
    let (_dir, _repo, provider, service) = setup();
    let err = service.refresh_connection("item-missing", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(provider.link_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_token_is_auth_error() {
    let (_dir, repo, _provider, service) = setup();
    let err = service
        .exchange_public_token(ProviderKind::Plaid, "garbage", None)
        .await
        .unwrap_err();
    assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Auth));
    assert!(repo.list_linked_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_institution_lookup_becomes_warning() {
    let (_dir, repo, provider, service) = setup();
    *provider.item_lookup_fails.lock().unwrap() = true;

    let result = service
        .exchange_public_token(ProviderKind::Plaid, "public-xyz", None)
        .await
        .unwrap();
    assert!(result.institution_name.is_none());
    assert_eq!(result.warnings.len(), 1);
    assert!(repo.get_linked_item("item-xyz").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unconfigured_provider_is_config_error() {
    let (_dir, _repo, _provider, service) = setup();
    let err = service
        .exchange_public_token(ProviderKind::SaltEdge, "public-abc", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_register_salt_edge_connection() {
    const SALT_EDGE: &[Capability] = &[
        Capability::GetAccounts,
        Capability::GetTransactions,
        Capability::RefreshConnectionInteractive,
        Capability::CreateConnectionInteractive,
    ];
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(&dir);
    let provider = Arc::new(ScriptedProvider::new(ProviderKind::SaltEdge).with_capabilities(SALT_EDGE));
    let store: Arc<dyn Repository> = repo.clone();
    let service = LinkService::new(store, ProviderRegistry::new().with(provider));

    let item = service.register_connection("1227", Some("Fake Bank")).await.unwrap();
    assert_eq!(item.item_id, "1227");
    assert_eq!(item.access_token, "1227");
    assert_eq!(item.provider, ProviderKind::SaltEdge);

    // Token exchange is a Plaid-only capability
    let err = service
        .exchange_public_token(ProviderKind::SaltEdge, "public-abc", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation { .. }));

    assert!(matches!(
        service.register_connection("  ", None).await.unwrap_err(),
        Error::Validation(_)
    ));
    assert!(matches!(
        service.get_item("missing").await.unwrap_err(),
        Error::NotFound(_)
    ));
}
