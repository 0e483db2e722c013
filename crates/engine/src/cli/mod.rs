//! Command-line interface.
//!
//! One binary, five subcommands. `serve` runs the engine; the rest are
//! thin clients: `list-crons` and `end-session` talk to the store
//! directly, `reload-config` and `trigger-cron` talk to a running
//! server (hot reload has to happen inside the serving process).
//!
//! Exit codes: 0 success, 2 invalid arguments, 3 unreachable store,
//! 4 invalid config, 1 anything else.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use sw_domain::config::RuntimeConfig;
use sw_domain::error::Error;
use sw_domain::session::SessionStatus;
use sw_store::Store;

#[derive(Parser)]
#[command(name = "swarmgate", about = "Autonomous-agent runtime", version)]
pub struct Cli {
    /// Path to the runtime config (TOML).
    #[arg(long, global = true, default_value = "config/swarmgate.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the engine (default).
    Serve,
    /// Validate the config locally, then hot-reload the running server.
    ReloadConfig {
        /// Server base URL; defaults to the configured host/port.
        #[arg(long)]
        server: Option<String>,
    },
    /// List the persisted cron entries.
    ListCrons,
    /// Fire a cron entry immediately on the running server.
    TriggerCron { id: String },
    /// End a session (status = ended).
    EndSession { id: String },
}

/// Map a failure onto the documented process exit codes.
pub fn exit_code_for(e: &Error) -> i32 {
    match e {
        Error::ConfigInvalid(_) => 4,
        Error::PersistenceUnavailable(_) => 3,
        Error::Other(msg) if msg.starts_with("invalid argument") => 2,
        _ => 1,
    }
}

/// Load the runtime config with env overrides applied.
pub fn load_config(path: &std::path::Path) -> sw_domain::Result<RuntimeConfig> {
    let mut config = RuntimeConfig::load(path)?;
    config.apply_env_overrides();
    Ok(config)
}

fn server_url(config: &RuntimeConfig, explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| {
        format!("http://{}:{}", config.server.host, config.server.port)
    })
}

fn admin_headers(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match std::env::var("ADMIN_TOKEN") {
        Ok(token) if !token.is_empty() => builder.bearer_auth(token),
        _ => builder,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client subcommands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn reload_config(config_path: &std::path::Path, server: Option<String>) -> sw_domain::Result<()> {
    let config = load_config(config_path)?;
    // Validate locally first: a broken catalog exits 4 without touching
    // the server.
    let catalog = sw_domain::config::load_catalog(&config)?;
    println!(
        "config valid: {} agents, reloading server",
        catalog.agent_count()
    );

    let url = format!("{}/admin/reload", server_url(&config, server));
    let client = reqwest::Client::new();
    let response = admin_headers(client.post(&url))
        .send()
        .await
        .map_err(|e| Error::Http(format!("POST {url}: {e}")))?;

    if response.status().is_success() {
        println!("reloaded");
        Ok(())
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Http(format!("server returned {status}: {body}")))
    }
}

pub async fn list_crons(config_path: &std::path::Path) -> sw_domain::Result<()> {
    let config = load_config(config_path)?;
    let store = Store::connect(&config.store.database_url, 2).await?;

    let entries = store.list_crons().await?;
    if entries.is_empty() {
        println!("no cron entries");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:<24} {:<16} enabled={:<5} agent={:<16} next={}",
            entry.id,
            entry.schedule,
            entry.enabled,
            entry.agent_id,
            entry
                .next_run_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

pub async fn trigger_cron(config_path: &std::path::Path, id: &str) -> sw_domain::Result<()> {
    let config = load_config(config_path)?;
    let url = format!("{}/cron/{id}/trigger", server_url(&config, None));
    let client = reqwest::Client::new();
    let response = admin_headers(client.post(&url))
        .send()
        .await
        .map_err(|e| Error::Http(format!("POST {url}: {e}")))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("{body}");
        Ok(())
    } else {
        Err(Error::Http(format!("server returned {status}: {body}")))
    }
}

pub async fn end_session(config_path: &std::path::Path, id: &str) -> sw_domain::Result<()> {
    let session_id: Uuid = id
        .parse()
        .map_err(|_| Error::Other(format!("invalid argument: '{id}' is not a session id")))?;

    let config = load_config(config_path)?;
    let store = Store::connect(&config.store.database_url, 2).await?;
    store.end_session(session_id, SessionStatus::Ended).await?;
    println!("session {session_id} ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code_for(&Error::ConfigInvalid("bad".into())), 4);
        assert_eq!(
            exit_code_for(&Error::PersistenceUnavailable("down".into())),
            3
        );
        assert_eq!(
            exit_code_for(&Error::Other("invalid argument: nope".into())),
            2
        );
        assert_eq!(exit_code_for(&Error::Http("boom".into())), 1);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["swarmgate", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));

        let cli = Cli::parse_from(["swarmgate", "trigger-cron", "daily-digest"]);
        match cli.command {
            Some(Command::TriggerCron { id }) => assert_eq!(id, "daily-digest"),
            _ => panic!("expected trigger-cron"),
        }

        let cli = Cli::parse_from(["swarmgate", "--config", "/tmp/x.toml", "list-crons"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/x.toml"));
    }

    #[test]
    fn default_command_is_none() {
        let cli = Cli::parse_from(["swarmgate"]);
        assert!(cli.command.is_none());
    }
}
