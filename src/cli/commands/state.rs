use serde_json::Value;

use crate::cli::client::BrokerClient;
use crate::cli::utils::{field, output_value};
use crate::cli::OutputFormat;

pub async fn handle(client: &BrokerClient, output_format: OutputFormat) -> anyhow::Result<()> {
    client.require_token()?;
    let state = client.get("/api/elevation-state").await?;
    if let OutputFormat::Json = output_format {
        return output_value(output_format, &state);
    }

    match state.get("pendingRequestForMe").filter(|v| !v.is_null()) {
        Some(pending) => {
            let prompt = pending.get("prompt").cloned().unwrap_or(Value::Null);
            println!("{}", field(&prompt, "body"));
            println!(
                "  request {} (respond within {})",
                field(pending, "requestId"),
                field(&prompt, "countdown")
            );
        }
        None => println!("No access request is waiting for you."),
    }

    if let Some(outgoing) = state.get("outgoingRequests").and_then(Value::as_array) {
        for request in outgoing {
            println!(
                "Waiting on {} for request {} ({}s left)",
                field(request, "targetEmail"),
                field(request, "requestId"),
                request.get("remainingSeconds").and_then(Value::as_i64).unwrap_or(0)
            );
        }
    }

    match state.get("activeSessionInvolvingMe").filter(|v| !v.is_null()) {
        Some(session) => {
            let banner = session.get("banner").cloned().unwrap_or(Value::Null);
            println!("{} [{} left]", field(&banner, "message"), field(&banner, "countdown"));
            println!("  session {}", field(session, "sessionId"));
        }
        None => println!("No elevated session is active."),
    }
    Ok(())
}

pub async fn health(client: &BrokerClient, output_format: OutputFormat) -> anyhow::Result<()> {
    let health = client.get("/health").await?;
    output_value(output_format, &health)
}
