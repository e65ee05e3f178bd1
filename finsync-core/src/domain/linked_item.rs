//! Linked item domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::Error;

/// Aggregator behind a linked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Plaid,
    SaltEdge,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaid => "plaid",
            Self::SaltEdge => "saltedge",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plaid" => Ok(Self::Plaid),
            "saltedge" | "salt_edge" | "salt-edge" => Ok(Self::SaltEdge),
            other => Err(Error::validation(format!("Unknown provider: {}", other))),
        }
    }
}

/// A persisted credential bundle for one institution connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedItem {
    pub item_id: String,
    /// Plaid access token, or the connection id for Salt Edge
    pub access_token: String,
    pub institution_name: Option<String>,
    pub provider: ProviderKind,
    pub needs_relogin: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkedItem {
    pub fn new(
        provider: ProviderKind,
        item_id: impl Into<String>,
        access_token: impl Into<String>,
        institution_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            item_id: item_id.into(),
            access_token: access_token.into(),
            institution_name,
            provider,
            needs_relogin: false,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credentials to thread through provider calls for this item
    pub fn credentials(&self) -> Credentials<'_> {
        Credentials {
            item_id: &self.item_id,
            access_token: &self.access_token,
        }
    }

    /// Mark the item as requiring re-authentication
    pub fn mark_needs_relogin(&mut self) {
        self.needs_relogin = true;
        self.updated_at = Utc::now();
    }

    /// Record a completed import batch
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
        self.updated_at = at;
    }
}

/// Per-request provider credentials.
///
/// Borrowed from the linked item for the duration of one call so that two
/// concurrent syncs for different items never share token state.
#[derive(Clone, Copy)]
pub struct Credentials<'a> {
    pub item_id: &'a str,
    pub access_token: &'a str,
}

impl<'a> Credentials<'a> {
    pub fn new(item_id: &'a str, access_token: &'a str) -> Self {
        Self {
            item_id,
            access_token,
        }
    }
}

impl fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("item_id", &self.item_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("plaid".parse::<ProviderKind>().unwrap(), ProviderKind::Plaid);
        assert_eq!("SaltEdge".parse::<ProviderKind>().unwrap(), ProviderKind::SaltEdge);
        assert!("mx".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let item = LinkedItem::new(ProviderKind::Plaid, "item-1", "access-secret", None);
        let debug = format!("{:?}", item.credentials());
        assert!(debug.contains("item-1"));
        assert!(!debug.contains("access-secret"));
    }

    #[test]
    fn test_mark_synced() {
        let mut item = LinkedItem::new(ProviderKind::Plaid, "item-1", "tok", None);
        assert!(item.last_synced_at.is_none());
        let now = Utc::now();
        item.mark_synced(now);
        assert_eq!(item.last_synced_at, Some(now));
    }
}
