//! Rates command - import exchange rates

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum RatesCommands {
    /// Import rates from a CSV file with columns date,currency,rate (units per EUR)
    Import {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: RatesCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        RatesCommands::Import { file, json } => {
            let result = ctx.rate_service.import_csv(&file);
            if json {
                return output::json_result(result);
            }
            let result = result?;
            output::success(&format!("Imported {} exchange rates", result.imported));
            for error in &result.errors {
                output::warning(&format!("  {}", error));
            }
        }
    }

    Ok(())
}
