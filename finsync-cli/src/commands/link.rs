//! Link command - token exchange, connection registration and sessions

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use finsync_core::services::RelinkSession;
use finsync_core::ProviderKind;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum LinkCommands {
    /// Exchange a public token from the link widget for a linked item
    Exchange {
        /// Public token returned by the link flow
        public_token: String,
        /// Provider that issued the token
        #[arg(long, default_value = "plaid")]
        provider: ProviderKind,
        /// Institution name (looked up when omitted)
        #[arg(long)]
        institution: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Register an existing Salt Edge connection
    Register {
        /// Salt Edge connection id
        connection_id: String,
        #[arg(long)]
        institution: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Create a link token for the client-side widget
    Token {
        #[arg(long, default_value = "plaid")]
        provider: ProviderKind,
        /// Stable id of the end user (random when omitted)
        #[arg(long)]
        client_user_id: Option<String>,
        /// Bind the token to a payment
        #[arg(long)]
        payment_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Open a session to connect a new institution
    Connect {
        /// Salt Edge customer id
        #[arg(long)]
        customer_id: String,
        #[arg(long, default_value = "saltedge")]
        provider: ProviderKind,
        /// URL to return to after the session
        #[arg(long)]
        return_to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Start re-authentication of an item: a connect URL, or an update-mode link token
    Refresh {
        item_id: String,
        #[arg(long)]
        return_to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Create a public token for an item; exchanging it again clears the re-login flag
    PublicToken {
        item_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Check that a re-authenticated item works and clear its re-login flag
    Confirm {
        item_id: String,
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: LinkCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        LinkCommands::Exchange {
            public_token,
            provider,
            institution,
            json,
        } => {
            let result = ctx
                .link_service
                .exchange_public_token(provider, &public_token, institution.as_deref())
                .await;
            if json {
                return output::json_result(result);
            }
            let result = result?;
            output::success(&format!("Linked item {}", result.item_id));
            if let Some(name) = &result.institution_name {
                println!("  Institution: {}", name);
            }
            for warning in &result.warnings {
                output::warning(&format!("  {}", warning));
            }
        }
        LinkCommands::Register {
            connection_id,
            institution,
            json,
        } => {
            let result = ctx
                .link_service
                .register_connection(&connection_id, institution.as_deref())
                .await;
            if json {
                return output::json_result(result.map(|item| item.item_id));
            }
            let item = result?;
            output::success(&format!("Registered connection {}", item.item_id));
        }
        LinkCommands::Token {
            provider,
            client_user_id,
            payment_id,
            json,
        } => {
            let result = ctx
                .link_service
                .create_link_token(provider, client_user_id.as_deref(), payment_id.as_deref())
                .await;
            if json {
                return output::json_result(result);
            }
            let token = result?;
            println!("{} {}", "Link token:".bold(), token.link_token);
            if let Some(expiration) = token.expiration {
                println!("  Expires: {}", expiration);
            }
        }
        LinkCommands::Connect {
            customer_id,
            provider,
            return_to,
            json,
        } => {
            let result = ctx
                .link_service
                .create_connection(provider, &customer_id, return_to.as_deref())
                .await;
            if json {
                return output::json_result(result);
            }
            let session = result?;
            output::info("Open this URL to connect your bank:");
            println!("  {}", session.connect_url);
        }
        LinkCommands::Refresh {
            item_id,
            return_to,
            json,
        } => {
            let result = ctx
                .link_service
                .refresh_connection(&item_id, return_to.as_deref())
                .await;
            if json {
                return output::json_result(result);
            }
            match result? {
                RelinkSession::Connect(session) => {
                    output::info("Open this URL to re-authenticate:");
                    println!("  {}", session.connect_url);
                }
                RelinkSession::UpdateLink(token) => {
                    output::info("Open Link in update mode with this token:");
                    println!("  {}", token.link_token);
                    println!(
                        "  Then run 'finsync link confirm {}' once the user has signed in.",
                        item_id
                    );
                }
            }
        }
        LinkCommands::PublicToken { item_id, json } => {
            let result = ctx.link_service.create_public_token(&item_id).await;
            if json {
                return output::json_result(result);
            }
            println!("{} {}", "Public token:".bold(), result?);
        }
        LinkCommands::Confirm { item_id, json } => {
            let result = ctx.link_service.confirm_relogin(&item_id).await;
            if json {
                return output::json_result(result.map(|item| item.item_id));
            }
            let item = result?;
            output::success(&format!("Item {} is connected again", item.item_id));
        }
    }

    Ok(())
}
