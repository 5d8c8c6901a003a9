// src/main.rs
// Minimal CLI entry point: `ccp serve` runs the MCP server over stdio,
// `ccp whoami` and `ccp register` are thin wrappers for shell use outside an
// MCP client. See SPEC_FULL.md's "CLI surface (minimal, ambient only)".

use anyhow::Result;
use ccp_engine::config::Config;
use ccp_engine::domain::Priority;
use ccp_engine::Engine;
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ccp", version, about = "Local multi-participant coordination message bus")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server over stdio (default when no subcommand is given).
    Serve,
    /// Print the identity this process would act as.
    Whoami,
    /// Register a new participant and exit.
    Register {
        participant_id: String,
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
        #[arg(long, default_value = "M")]
        default_priority: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Stdio is the MCP transport for `serve`; logging must go to stderr only
    // or it would corrupt the protocol stream.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = Config::load();
    let engine = Engine::open(&config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let identity = config
                .participant_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("set participant_id in config or CCP_PARTICIPANT_ID"))?;
            let server = engine.dispatcher_for(&identity).await?;
            info!(%identity, "starting ccp server over stdio");

            let transport = rmcp::transport::io::stdio();
            let service = rmcp::serve_server(server, transport).await?;
            service.waiting().await?;
        }
        Commands::Whoami => {
            let identity = config
                .participant_id
                .ok_or_else(|| anyhow::anyhow!("set participant_id in config or CCP_PARTICIPANT_ID"))?;
            let participant = engine.registry.require(&identity).await?;
            println!("{} (status: {})", participant.id, participant.status);
        }
        Commands::Register {
            participant_id,
            capabilities,
            default_priority,
        } => {
            let priority = Priority::from_str(&default_priority)
                .map_err(|e| anyhow::anyhow!("invalid --default-priority: {e}"))?;
            let participant = engine
                .registry
                .register(&participant_id, capabilities, priority)
                .await?;
            println!("registered {}", participant.id);
        }
    }

    Ok(())
}
