//! Report command - generate an asset report with a cancellable wait

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Request an asset report for an item and wait until it is ready
    Assets {
        item_id: String,
        /// Write the PDF rendering to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Print `{pdf, json}` instead of a summary
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: ReportCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        ReportCommands::Assets { item_id, output: pdf_path, json } => {
            let item = ctx.link_service.get_item(&item_id).await?;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let spinner = if json {
                ProgressBar::hidden()
            } else {
                ProgressBar::new_spinner()
            };
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} ({elapsed})") {
                spinner.set_style(style);
            }
            spinner.set_message("Waiting for asset report, Ctrl-C to cancel");
            spinner.enable_steady_tick(Duration::from_millis(120));

            let result = ctx
                .report_service
                .request_asset_report(item.provider, &item.access_token, &cancel)
                .await;
            spinner.finish_and_clear();
            watcher.abort();

            if json {
                return output::json_result(result);
            }
            let report = result?;

            if let Some(path) = pdf_path {
                let bytes = STANDARD
                    .decode(&report.pdf)
                    .context("Report PDF is not valid base64")?;
                std::fs::write(&path, bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                output::success(&format!("Asset report PDF written to {}", path.display()));
            } else {
                output::success("Asset report ready");
            }
            if let Some(token) = report.json.get("asset_report_id").and_then(|v| v.as_str()) {
                println!("  Report id: {}", token);
            }
        }
    }

    Ok(())
}
