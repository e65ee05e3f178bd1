//! Output formatting utilities

use std::fmt;

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use rust_decimal::Decimal;
use serde::Serialize;

use finsync_core::domain::result::Result as CoreResult;
use finsync_core::OperationResult;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn format_amount(amount: Option<Decimal>) -> String {
    match amount {
        Some(value) => format!("{:.2}", value),
        None => "-".to_string(),
    }
}

/// Error that was already written to stdout as JSON
#[derive(Debug)]
pub struct Reported;

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation failed")
    }
}

impl std::error::Error for Reported {}

/// Print a core result wrapped in the `OperationResult` envelope.
///
/// A failure is printed too, then returned as `Reported` so the caller
/// exits non-zero without printing it a second time.
pub fn json_result<T: Serialize>(result: CoreResult<T>) -> anyhow::Result<()> {
    let envelope = OperationResult::from(result);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if envelope.success {
        Ok(())
    } else {
        Err(Reported.into())
    }
}
