//! tempsvc - start disposable service containers from the command line.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tempsvc::cli::{Cli, Command, run_reap_command, run_service_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tempsvc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_service_command(args).await,
        Command::Reap => run_reap_command().await,
    }
}
