//! Configuration management
//!
//! Settings live in `<data dir>/settings.json`:
//! ```json
//! {
//!   "baseCurrency": "EUR",
//!   "plaid": { "clientId": "...", "secret": "...", "environment": "sandbox" },
//!   "saltEdge": { "appId": "...", "secret": "..." },
//!   "poller": { "maxAttempts": 20, "intervalMs": 1000, "daysRequested": 10 }
//! }
//! ```
//! Environment variables override the file, so credentials can stay out of it.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::result::Error;

pub const DEFAULT_BASE_CURRENCY: &str = "EUR";

/// Plaid API environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaidEnvironment {
    #[default]
    Sandbox,
    Development,
    Production,
}

impl PlaidEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.plaid.com",
            Self::Development => "https://development.plaid.com",
            Self::Production => "https://production.plaid.com",
        }
    }
}

impl FromStr for PlaidEnvironment {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(Error::Config(format!("Unknown Plaid environment: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaidConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub environment: PlaidEnvironment,
    /// Overrides the environment URL (mock servers)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_products")]
    pub products: Vec<String>,
    #[serde(default = "default_country_codes")]
    pub country_codes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for PlaidConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            secret: String::new(),
            environment: PlaidEnvironment::default(),
            base_url: None,
            products: default_products(),
            country_codes: default_country_codes(),
            redirect_uri: None,
            client_name: default_client_name(),
        }
    }
}

impl PlaidConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.secret.is_empty()
    }

    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url().to_string())
    }
}

fn default_products() -> Vec<String> {
    vec!["transactions".to_string()]
}

fn default_country_codes() -> Vec<String> {
    vec!["US".to_string()]
}

fn default_client_name() -> String {
    "finsync".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaltEdgeConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl SaltEdgeConfig {
    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty() && !self.secret.is_empty()
    }
}

/// Asset report polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_days_requested")]
    pub days_requested: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            days_requested: default_days_requested(),
        }
    }
}

fn default_max_attempts() -> u32 {
    20
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_days_requested() -> u32 {
    10
}

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    base_currency: Option<String>,
    #[serde(default)]
    plaid: PlaidConfig,
    #[serde(default)]
    salt_edge: SaltEdgeConfig,
    #[serde(default)]
    poller: PollerSettings,
}

/// finsync configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Currency every transaction is normalized into
    pub base_currency: String,
    pub plaid: PlaidConfig,
    pub salt_edge: SaltEdgeConfig,
    pub poller: PollerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_currency: DEFAULT_BASE_CURRENCY.to_string(),
            plaid: PlaidConfig::default(),
            salt_edge: SaltEdgeConfig::default(),
            poller: PollerSettings::default(),
        }
    }
}

impl Config {
    /// Load config from the data directory, then apply environment overrides
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with_env(dir, |key| std::env::var(key).ok())
    }

    /// Same as `load`, with an explicit variable lookup
    pub fn load_with_env<F>(dir: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings_path = dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings file {}", settings_path.display()))?
        } else {
            SettingsFile::default()
        };

        let mut config = Self {
            base_currency: raw
                .base_currency
                .unwrap_or_else(|| DEFAULT_BASE_CURRENCY.to_string()),
            plaid: raw.plaid,
            salt_edge: raw.salt_edge,
            poller: raw.poller,
        };
        config.apply_env(env)?;
        config.base_currency = config.base_currency.trim().to_uppercase();
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PLAID_CLIENT_ID") {
            self.plaid.client_id = v;
        }
        if let Some(v) = var("PLAID_SECRET") {
            self.plaid.secret = v;
        }
        if let Some(v) = var("PLAID_ENV") {
            self.plaid.environment = v.parse()?;
        }
        if let Some(v) = var("PLAID_PRODUCTS") {
            self.plaid.products = split_list(&v);
        }
        if let Some(v) = var("PLAID_COUNTRY_CODES") {
            self.plaid.country_codes = split_list(&v);
        }
        if let Some(v) = var("PLAID_REDIRECT_URI") {
            self.plaid.redirect_uri = Some(v);
        }
        if let Some(v) = var("PLAID_BASE_URL") {
            self.plaid.base_url = Some(v);
        }
        if let Some(v) = var("SALTEDGE_APP_ID") {
            self.salt_edge.app_id = v;
        }
        if let Some(v) = var("SALTEDGE_SECRET") {
            self.salt_edge.secret = v;
        }
        if let Some(v) = var("SALTEDGE_BASE_URL") {
            self.salt_edge.base_url = Some(v);
        }
        if let Some(v) = var("FINSYNC_BASE_CURRENCY") {
            self.base_currency = v;
        }
        Ok(())
    }

    /// Save config to the data directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        let settings = SettingsFile {
            base_currency: Some(self.base_currency.clone()),
            plaid: self.plaid.clone(),
            salt_edge: self.salt_edge.clone(),
            poller: self.poller,
        };
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(dir.join("settings.json"), content)?;
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
