//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod currency;
mod provider;
mod repository;

pub use crate::domain::Capability;
pub use currency::CurrencyConverter;
pub use provider::{
    ConnectSession, ItemInfo, LinkToken, LinkTokenRequest, PaymentCreated, PaymentRequest,
    ProviderAdapter, ProviderRegistry, RecipientAddress, TokenExchange,
};
pub use repository::Repository;
