//! Items command - list linked items

use anyhow::Result;
use colored::Colorize;

use super::get_context;
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx.link_service.list_items().await;

    if json {
        // Never print access tokens
        let redacted = result.map(|items| {
            items
                .into_iter()
                .map(|mut item| {
                    item.access_token = "<redacted>".to_string();
                    item
                })
                .collect::<Vec<_>>()
        });
        return output::json_result(redacted);
    }

    let items = result?;
    if items.is_empty() {
        output::warning("No linked items. Use 'finsync link exchange' or 'finsync link register'.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Item", "Provider", "Institution", "Last synced", "Status"]);
    for item in &items {
        let status = if item.needs_relogin {
            "re-login required".red().to_string()
        } else {
            "ok".green().to_string()
        };
        table.add_row(vec![
            item.item_id.clone(),
            item.provider.to_string(),
            item.institution_name.clone().unwrap_or_default(),
            item.last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
            status,
        ]);
    }
    println!("{}", table);
    Ok(())
}
