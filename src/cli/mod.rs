//! CLI command handling.
//!
//! Provides subcommands for:
//! - Starting a service and holding it until Ctrl-C (`run`)
//! - Removing containers whose expiry has passed (`reap`)

mod reap;
mod run;

pub use reap::run_reap_command;
pub use run::{RunArgs, RunSummary, ServiceKind, run_service_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tempsvc")]
#[command(about = "Start disposable service containers for local testing")]
#[command(
    long_about = "Starts throwaway database, cache and broker containers that remove themselves.\nExamples:\n  tempsvc run redis  # Start Redis on a free port\n  tempsvc run mysql --port 3307 --init-sql ./sql\n  tempsvc reap  # Remove expired containers"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a service container and keep it until interrupted
    #[command(
        about = "Start a service container",
        long_about = "Starts the service, waits until it accepts clients, prints its endpoint\nand removes it on Ctrl-C.\nExample: tempsvc run nats-streaming --file-store --data /tmp/stan"
    )]
    Run(RunArgs),

    /// Remove expired containers left by earlier runs
    Reap,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "tempsvc",
            "run",
            "mysql",
            "--port",
            "3307",
            "--ttl",
            "30",
            "--init-sql",
            "/tmp/sql",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.service, ServiceKind::Mysql);
        assert_eq!(args.port, Some(3307));
        assert_eq!(args.ttl, Some(30));
        assert_eq!(args.init_sql.as_deref(), Some(std::path::Path::new("/tmp/sql")));
        assert!(!args.json);
    }

    #[test]
    fn test_parse_service_names() {
        let cli = Cli::try_parse_from(["tempsvc", "run", "nats-streaming", "--file-store"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.service, ServiceKind::NatsStreaming);
        assert!(args.file_store);

        assert!(Cli::try_parse_from(["tempsvc", "run", "postgres"]).is_err());
    }

    #[test]
    fn test_parse_reap() {
        let cli = Cli::try_parse_from(["tempsvc", "reap"]).unwrap();
        assert!(matches!(cli.command, Command::Reap));
    }
}
