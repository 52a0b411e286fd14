use clap::Subcommand;
use uuid::Uuid;

use crate::cli::client::BrokerClient;
use crate::cli::utils::{field, output_success, output_value};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum SessionCommands {
    #[command(about = "Show one session")]
    Get {
        #[arg(help = "Session id")]
        id: Uuid,
    },

    #[command(about = "End a session you take part in")]
    End {
        #[arg(help = "Session id")]
        id: Uuid,
    },
}

pub async fn handle(cmd: SessionCommands, client: &BrokerClient, output_format: OutputFormat) -> anyhow::Result<()> {
    client.require_token()?;
    match cmd {
        SessionCommands::Get { id } => {
            let session = client.get(&format!("/api/elevation-sessions/{}", id)).await?;
            output_value(output_format, &session)
        }
        SessionCommands::End { id } => {
            let result = client.post(&format!("/api/elevation-sessions/{}/end", id), None).await?;
            let message = if result.get("ended").and_then(|v| v.as_bool()).unwrap_or(false) {
                format!("Session {} ended", id)
            } else {
                format!("Session {} was already ended ({})", id, field(&result, "endReason"))
            };
            output_success(output_format, &message, Some(result))
        }
    }
}
