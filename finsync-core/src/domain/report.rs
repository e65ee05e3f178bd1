//! Asset report types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A finished asset report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReport {
    /// Base64-encoded PDF rendering
    pub pdf: String,
    /// Structured report as returned by the provider
    pub json: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
}

/// In-memory state of one report polling run. Never persisted.
#[derive(Debug, Clone)]
pub struct AssetReportJob {
    pub report_token: String,
    pub attempts: u32,
    pub state: JobState,
}

impl AssetReportJob {
    pub fn new(report_token: impl Into<String>) -> Self {
        Self {
            report_token: report_token.into(),
            attempts: 0,
            state: JobState::Pending,
        }
    }
}
