//! CLI command implementations

pub mod accounts;
pub mod activity;
pub mod items;
pub mod link;
pub mod products;
pub mod rates;
pub mod report;
pub mod sync;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use finsync_core::services::{Activity, ActivityLog};
use finsync_core::{FinsyncContext, LinkedItem};
use tracing::{debug, warn};

/// Open the activity log in the data directory
pub fn open_activity_log() -> Result<ActivityLog> {
    let dir = get_data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    Ok(ActivityLog::open(&dir, env!("CARGO_PKG_VERSION"))?)
}

/// Activity log for recording outcomes; None when it cannot be opened
pub fn activity_log() -> Option<ActivityLog> {
    match open_activity_log() {
        Ok(log) => Some(log),
        Err(e) => {
            debug!(error = %e, "activity log unavailable");
            None
        }
    }
}

/// Record an outcome. A failed write never fails the command.
pub fn record(log: Option<&ActivityLog>, activity: Activity) {
    if let Some(log) = log {
        if let Err(e) = log.record(&activity) {
            warn!(kind = %activity.kind, error = %e, "could not record activity");
        }
    }
}

/// Data directory from FINSYNC_DIR, or ~/.finsync
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("FINSYNC_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".finsync"))
        .ok_or_else(|| anyhow!("Could not find home directory; set FINSYNC_DIR"))
}

/// Open the data directory and build the context
pub fn get_context() -> Result<FinsyncContext> {
    let dir = get_data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    debug!(dir = %dir.display(), "opening data directory");
    FinsyncContext::new(&dir).context("Failed to initialize finsync")
}

/// One item by id, or every linked item
pub async fn select_items(ctx: &FinsyncContext, item_id: Option<&str>) -> Result<Vec<LinkedItem>> {
    match item_id {
        Some(id) => Ok(vec![ctx.link_service.get_item(id).await?]),
        None => Ok(ctx.link_service.list_items().await?),
    }
}
