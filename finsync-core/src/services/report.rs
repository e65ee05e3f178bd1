//! Asset report poller
//!
//! Report generation is asynchronous on the provider side. The poller
//! creates a report, polls it at a fixed interval while the provider answers
//! "not ready", then fetches the PDF. Jobs live only in memory.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PollerSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{AssetReport, AssetReportJob, Capability, JobState, ProviderKind};
use crate::ports::{ProviderAdapter, ProviderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub max_attempts: u32,
    pub interval: Duration,
    pub days_requested: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::from(PollerSettings::default())
    }
}

impl From<PollerSettings> for PollerConfig {
    fn from(settings: PollerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            interval: Duration::from_millis(settings.interval_ms),
            days_requested: settings.days_requested,
        }
    }
}

pub struct ReportService {
    providers: ProviderRegistry,
    config: PollerConfig,
}

impl ReportService {
    pub fn new(providers: ProviderRegistry, config: PollerConfig) -> Self {
        Self { providers, config }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Create an asset report and wait for it to become ready.
    ///
    /// Fails with `ReportTimeout` once the attempt cap is reached and with
    /// `Cancelled` when `cancel` fires before or during a wait.
    pub async fn request_asset_report(
        &self,
        provider: ProviderKind,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<AssetReport> {
        let adapter = self.providers.get(provider)?;
        for capability in [
            Capability::CreateAssetReport,
            Capability::GetAssetReport,
            Capability::GetAssetReportPdf,
        ] {
            adapter.ensure_supported(capability)?;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let report_token = adapter
            .create_asset_report(access_token, self.config.days_requested)
            .await?;
        let mut job = AssetReportJob::new(report_token);
        info!(%provider, "asset report requested");

        let json = self.poll(adapter.as_ref(), &mut job, cancel).await?;
        let pdf = adapter.get_asset_report_pdf(&job.report_token).await?;

        info!(%provider, attempts = job.attempts, pdf_bytes = pdf.len(), "asset report ready");
        Ok(AssetReport {
            pdf: STANDARD.encode(pdf),
            json,
        })
    }

    async fn poll(
        &self,
        adapter: &dyn ProviderAdapter,
        job: &mut AssetReportJob,
        cancel: &CancellationToken,
    ) -> Result<JsonValue> {
        loop {
            if cancel.is_cancelled() {
                job.state = JobState::Cancelled;
                return Err(Error::Cancelled);
            }

            job.attempts += 1;
            match adapter.get_asset_report(&job.report_token).await {
                Ok(report) => {
                    job.state = JobState::Ready;
                    return Ok(report);
                }
                Err(e) if e.is_product_not_ready() => {
                    debug!(attempt = job.attempts, max = self.config.max_attempts, "asset report not ready");
                }
                Err(e) => {
                    job.state = JobState::Failed;
                    return Err(e);
                }
            }

            if job.attempts >= self.config.max_attempts {
                job.state = JobState::TimedOut;
                return Err(Error::ReportTimeout {
                    attempts: job.attempts,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    job.state = JobState::Cancelled;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}
