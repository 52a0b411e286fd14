use serde_json::Value;
use uuid::Uuid;

use crate::cli::client::BrokerClient;
use crate::cli::utils::{field, output_empty_collection, output_value};
use crate::cli::OutputFormat;

pub async fn handle(
    client: &BrokerClient,
    subject_type: Option<String>,
    subject_id: Option<Uuid>,
    limit: Option<usize>,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    client.require_token()?;

    let mut params = Vec::new();
    if let Some(kind) = subject_type {
        params.push(format!("subjectType={}", kind));
    }
    if let Some(id) = subject_id {
        params.push(format!("subjectId={}", id));
    }
    if let Some(limit) = limit {
        params.push(format!("limit={}", limit));
    }
    let path = if params.is_empty() {
        "/api/elevation-audit".to_string()
    } else {
        format!("/api/elevation-audit?{}", params.join("&"))
    };

    let entries = client.get(&path).await?;
    let rows = entries.as_array().cloned().unwrap_or_default();
    if rows.is_empty() {
        return output_empty_collection(output_format, "entries", "No audit entries.");
    }
    if let OutputFormat::Json = output_format {
        return output_value(output_format, &entries);
    }

    for entry in &rows {
        println!(
            "{}  {:<17} {}  by {}{}",
            field(entry, "at"),
            field(entry, "transition"),
            field(entry, "subjectId"),
            field(entry, "actor"),
            detail_suffix(entry.get("detail"))
        );
    }
    Ok(())
}

fn detail_suffix(detail: Option<&Value>) -> String {
    match detail {
        Some(Value::Object(map)) if !map.is_empty() => format!("  {}", Value::Object(map.clone())),
        _ => String::new(),
    }
}
