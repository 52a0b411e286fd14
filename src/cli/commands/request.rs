use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::cli::client::BrokerClient;
use crate::cli::utils::{field, output_success, output_value};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum RequestCommands {
    #[command(about = "Ask for temporary access to a user's account")]
    Create {
        #[arg(help = "Email of the account to access")]
        target_email: String,
        #[arg(long, help = "Why access is needed (shown to the user)")]
        reason: Option<String>,
    },

    #[command(about = "Show one request")]
    Get {
        #[arg(help = "Request id")]
        id: Uuid,
    },

    #[command(about = "Approve a request targeting your account")]
    Approve {
        #[arg(help = "Request id")]
        id: Uuid,
    },

    #[command(about = "Reject a request targeting your account")]
    Reject {
        #[arg(help = "Request id")]
        id: Uuid,
    },
}

pub async fn handle(cmd: RequestCommands, client: &BrokerClient, output_format: OutputFormat) -> anyhow::Result<()> {
    client.require_token()?;
    match cmd {
        RequestCommands::Create { target_email, reason } => {
            let created = client
                .post(
                    "/api/elevation-requests",
                    Some(json!({ "targetEmail": target_email, "reason": reason })),
                )
                .await?;
            output_success(
                output_format,
                &format!(
                    "Request {} sent to {}; awaiting approval until {}",
                    field(&created, "requestId"),
                    target_email,
                    field(&created, "expiresAt")
                ),
                Some(created),
            )
        }
        RequestCommands::Get { id } => {
            let request = client.get(&format!("/api/elevation-requests/{}", id)).await?;
            output_value(output_format, &request)
        }
        RequestCommands::Approve { id } => {
            let approved = client.post(&format!("/api/elevation-requests/{}/approve", id), None).await?;
            output_success(
                output_format,
                &format!(
                    "Approved; session {} runs until {}",
                    field(&approved, "sessionId"),
                    field(&approved, "expiresAt")
                ),
                Some(approved),
            )
        }
        RequestCommands::Reject { id } => {
            let rejected = client.post(&format!("/api/elevation-requests/{}/reject", id), None).await?;
            output_success(output_format, &format!("Rejected request {}", id), Some(rejected))
        }
    }
}
