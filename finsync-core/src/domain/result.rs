//! Result and error types for the core library

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Capability, ProviderKind};

/// Normalized classification of a provider failure.
///
/// Every adapter maps its native error payloads onto these kinds so services
/// can decide on recovery without knowing which aggregator answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Credentials were rejected (bad public token, revoked access token, bad API keys)
    Auth,
    RateLimited,
    /// The user has to re-authenticate with the institution
    ItemLoginRequired,
    /// An asynchronous product (e.g. an asset report) is still being generated
    ProductNotReady,
    /// Provider or institution is down, or the request timed out
    Unavailable,
    Unknown,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "authentication failed",
            Self::RateLimited => "rate limited",
            Self::ItemLoginRequired => "item login required",
            Self::ProductNotReady => "product not ready",
            Self::Unavailable => "unavailable",
            Self::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// A normalized provider error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub provider: ProviderKind,
    pub kind: ProviderErrorKind,
    /// Native error code (Plaid `error_code`, Salt Edge error `class`)
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: ProviderKind, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} {} ({}): {}", self.provider, self.kind, code, self.message),
            None => write!(f, "{} {}: {}", self.provider, self.kind, self.message),
        }
    }
}

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("{provider} does not support {capability}")]
    UnsupportedOperation {
        provider: ProviderKind,
        capability: Capability,
    },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Currency conversion error: {0}")]
    Conversion(String),

    #[error("Asset report was not ready after {attempts} attempts")]
    ReportTimeout { attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a provider error
    pub fn provider(provider: ProviderKind, kind: ProviderErrorKind, msg: impl Into<String>) -> Self {
        Self::Provider(ProviderError::new(provider, kind, msg))
    }

    /// Create an unsupported-operation error
    pub fn unsupported(provider: ProviderKind, capability: Capability) -> Self {
        Self::UnsupportedOperation {
            provider,
            capability,
        }
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// The normalized provider kind, if this is a provider error
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::Provider(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_login_required(&self) -> bool {
        self.provider_kind() == Some(ProviderErrorKind::ItemLoginRequired)
    }

    pub fn is_product_not_ready(&self) -> bool {
        self.provider_kind() == Some(ProviderErrorKind::ProductNotReady)
    }
}

impl From<ProviderError> for Error {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(Error::Provider(e)) => {
                let mut context = HashMap::new();
                context.insert("provider".to_string(), serde_json::json!(e.provider));
                context.insert("kind".to_string(), serde_json::json!(e.kind));
                if let Some(code) = &e.code {
                    context.insert("code".to_string(), serde_json::json!(code));
                }
                Self::fail_with_context(e.to_string(), context)
            }
            Err(e) => Self::fail(e.to_string()),
        }
    }
}
