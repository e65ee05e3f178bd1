//! Products command - identity, auth, balances, investments and payment lookups

use anyhow::Result;
use clap::Subcommand;

use finsync_core::ProviderKind;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum ProductCommands {
    /// Account holder identity
    Identity { item_id: String },
    /// Account and routing numbers
    Auth { item_id: String },
    /// Balances fetched live from the institution
    Balance { item_id: String },
    /// Investment transactions of the last 30 days
    Investments { item_id: String },
    /// Investment holdings
    Holdings { item_id: String },
    /// Status of a payment
    Payment {
        payment_id: String,
        #[arg(long, default_value = "plaid")]
        provider: ProviderKind,
    },
}

/// Results are provider JSON, always printed in the JSON envelope
pub async fn run(command: ProductCommands) -> Result<()> {
    let ctx = get_context()?;
    let products = &ctx.product_service;

    let result = match command {
        ProductCommands::Identity { item_id } => {
            let item = ctx.link_service.get_item(&item_id).await?;
            products.identity(&item).await
        }
        ProductCommands::Auth { item_id } => {
            let item = ctx.link_service.get_item(&item_id).await?;
            products.auth(&item).await
        }
        ProductCommands::Balance { item_id } => {
            let item = ctx.link_service.get_item(&item_id).await?;
            products
                .balances(&item)
                .await
                .and_then(|accounts| Ok(serde_json::to_value(accounts)?))
        }
        ProductCommands::Investments { item_id } => {
            let item = ctx.link_service.get_item(&item_id).await?;
            products.recent_investment_transactions(&item).await
        }
        ProductCommands::Holdings { item_id } => {
            let item = ctx.link_service.get_item(&item_id).await?;
            products.holdings(&item).await
        }
        ProductCommands::Payment { payment_id, provider } => {
            products.get_payment(provider, &payment_id).await
        }
    };

    output::json_result(result)
}
