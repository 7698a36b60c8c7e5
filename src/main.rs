use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cynosure::app;
use cynosure::config::Config;

#[derive(Parser)]
#[command(name = "cynosure", about = "Conversational agent platform", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent core (A2A endpoints, OAuth callback, admin API).
    Agent,
    /// Run the messenger gateway (Telegram webhook ingress).
    Gateway,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Command::Agent => app::run_agent(config).await,
        Command::Gateway => app::run_gateway(config).await,
    }
}
