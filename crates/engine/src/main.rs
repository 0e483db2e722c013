use clap::Parser;
use tracing_subscriber::EnvFilter;

use sw_engine::cli::{self, Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            sw_engine::server::run_server(&cli.config).await
        }
        Some(Command::ReloadConfig { server }) => {
            cli::reload_config(&cli.config, server.clone()).await
        }
        Some(Command::ListCrons) => cli::list_crons(&cli.config).await,
        Some(Command::TriggerCron { id }) => cli::trigger_cron(&cli.config, id).await,
        Some(Command::EndSession { id }) => cli::end_session(&cli.config, id).await,
    };

    if let Err(e) = result {
        // Exit codes are derived from the typed error before it is
        // wrapped for reporting: 2 bad args, 3 store, 4 config, 1 other.
        let code = cli::exit_code_for(&e);
        let report = anyhow::Error::new(e)
            .context(format!("swarmgate {}", command_name(&cli.command)));
        eprintln!("error: {report:#}");
        std::process::exit(code);
    }
}

fn command_name(command: &Option<Command>) -> &'static str {
    match command {
        None | Some(Command::Serve) => "serve",
        Some(Command::ReloadConfig { .. }) => "reload-config",
        Some(Command::ListCrons) => "list-crons",
        Some(Command::TriggerCron { .. }) => "trigger-cron",
        Some(Command::EndSession { .. }) => "end-session",
    }
}

/// Structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sw_engine=debug")),
        )
        .json()
        .init();
}
