use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::client::BrokerClient;
use crate::cli::utils::{output_success, output_value};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum AuthCommands {
    #[command(about = "Mint a bearer token locally (development; needs the server's JWT secret)")]
    Token {
        #[arg(help = "Account id")]
        account_id: Uuid,
        #[arg(help = "Account email")]
        email: String,
        #[arg(long, env = "JWT_SECRET", hide_env_values = true, help = "Signing secret")]
        secret: String,
        #[arg(long, default_value_t = 24, help = "Token lifetime in hours")]
        hours: u64,
    },

    #[command(about = "Show the account behind the current token")]
    Whoami,

    #[command(about = "Sign out: force-close every elevated session involving this account")]
    Signout,
}

pub async fn handle(cmd: AuthCommands, client: &BrokerClient, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuthCommands::Token { account_id, email, secret, hours } => {
            let token = generate_jwt(&Claims::new(account_id, email, hours), &secret)?;
            match output_format {
                OutputFormat::Json => output_success(output_format, "Token issued", Some(json!({ "token": token }))),
                OutputFormat::Text => {
                    println!("{}", token);
                    Ok(())
                }
            }
        }
        AuthCommands::Whoami => {
            client.require_token()?;
            let me = client.get("/api/auth/whoami").await?;
            output_value(output_format, &me)
        }
        AuthCommands::Signout => {
            client.require_token()?;
            let result = client.delete("/api/auth/session").await?;
            let ended = result.get("sessionsEnded").and_then(|v| v.as_u64()).unwrap_or(0);
            output_success(
                output_format,
                &format!("Signed out ({} elevated session(s) closed)", ended),
                Some(result),
            )
        }
    }
}
