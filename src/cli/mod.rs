pub mod client;
pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use client::BrokerClient;

#[derive(Parser)]
#[command(name = "elevation")]
#[command(about = "Elevation CLI - request, approve and end support access sessions")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(
        long,
        global = true,
        env = "BROKER_URL",
        default_value = "http://localhost:3000",
        help = "Broker base URL"
    )]
    pub server: String,

    #[arg(long, global = true, env = "BROKER_TOKEN", hide_env_values = true, help = "Bearer token")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Tokens, identity and sign-out")]
    Auth {
        #[command(subcommand)]
        cmd: commands::auth::AuthCommands,
    },

    #[command(about = "Create, inspect and decide elevation requests")]
    Request {
        #[command(subcommand)]
        cmd: commands::request::RequestCommands,
    },

    #[command(about = "Inspect and end elevated sessions")]
    Session {
        #[command(subcommand)]
        cmd: commands::session::SessionCommands,
    },

    #[command(about = "Show what the current account sees right now")]
    State,

    #[command(about = "Read the audit trail (operators only)")]
    Audit {
        #[arg(long, help = "request or session")]
        subject_type: Option<String>,
        #[arg(long, help = "Request or session id")]
        subject_id: Option<uuid::Uuid>,
        #[arg(long, help = "Maximum entries when listing recent history")]
        limit: Option<usize>,
    },

    #[command(about = "Check broker health")]
    Health,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let client = BrokerClient::new(&cli.server, cli.token.clone())?;

    match cli.command {
        Commands::Auth { cmd } => commands::auth::handle(cmd, &client, output_format).await,
        Commands::Request { cmd } => commands::request::handle(cmd, &client, output_format).await,
        Commands::Session { cmd } => commands::session::handle(cmd, &client, output_format).await,
        Commands::State => commands::state::handle(&client, output_format).await,
        Commands::Audit { subject_type, subject_id, limit } => {
            commands::audit::handle(&client, subject_type, subject_id, limit, output_format).await
        }
        Commands::Health => commands::state::health(&client, output_format).await,
    }
}
