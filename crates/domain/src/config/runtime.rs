//! Runtime configuration (TOML) + the enumerated env overrides.
//!
//! Everything the engine needs besides the model catalog and agent
//! roster: server binding, database URL, gateway endpoint, safety
//! limits, scheduler cadence. Only the env vars listed in
//! [`apply_env_overrides`] are consulted; anything else is ignored.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS allowed origins. `["*"]` = allow all (dev only).
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8420,
            allowed_origins: vec!["*".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/swarmgate".into(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible proxy (LiteLLM).
    pub base_url: String,
    pub api_key_env: String,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".into(),
            api_key_env: "LITELLM_API_KEY".into(),
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SafetyConfig {
    /// Process-wide cap on concurrent pool tasks (roots + sub-agents).
    pub max_concurrent: usize,
    /// Max sub-agents a single task may spawn.
    pub max_children: u32,
    /// Max sub-agent nesting depth (root = 0).
    pub max_depth: u32,
    /// Sessions active longer than this are force-ended on sweep.
    pub stale_timeout_minutes: i64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_children: 3,
            max_depth: 2,
            stale_timeout_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Upper bound on how long the scheduler sleeps with an empty heap.
    pub idle_wake_secs: u64,
    /// Executions kept per cron entry.
    pub history_keep: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_wake_secs: 30,
            history_keep: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionDefaults {
    /// Context budget in tokens for composed message lists.
    pub context_budget_tokens: u32,
    /// Turns always kept when trimming.
    pub keep_last_turns: usize,
    /// Agent used when a session request names none.
    pub default_agent: Option<String>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            context_budget_tokens: 24_000,
            keep_last_turns: 4,
            default_agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub gateway: GatewayConfig,
    pub safety: SafetyConfig,
    pub scheduler: SchedulerConfig,
    pub sessions: SessionDefaults,
    /// Path to the model catalog YAML.
    pub catalog_path: PathBuf,
    /// Path to the agent roster YAML.
    pub roster_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            safety: SafetyConfig::default(),
            scheduler: SchedulerConfig::default(),
            sessions: SessionDefaults::default(),
            catalog_path: PathBuf::from("config/models.yaml"),
            roster_path: PathBuf::from("config/agents.yaml"),
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document. Unknown keys are rejected.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::ConfigInvalid(format!("runtime config: {e}")))
    }

    /// Load from a file, falling back to defaults when the file is absent.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Apply the enumerated environment overrides. Any other env var is
    /// ignored by the core.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LITELLM_URL") {
            if !url.is_empty() {
                self.gateway.base_url = url;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.store.database_url = url;
            }
        }
        if let Some(n) = env_parse::<usize>("MAX_CONCURRENT") {
            self.safety.max_concurrent = n.max(1);
        }
        if let Some(n) = env_parse::<u32>("BREAKER_THRESHOLD") {
            self.gateway.breaker_threshold = n.max(1);
        }
        if let Some(n) = env_parse::<u64>("BREAKER_COOLDOWN_SECONDS") {
            self.gateway.breaker_cooldown_secs = n.max(1);
        }
        if let Some(n) = env_parse::<i64>("STALE_TIMEOUT_MINUTES") {
            self.safety.stale_timeout_minutes = n.max(1);
        }
        // ADMIN_TOKEN is read (and hashed) by the API layer at startup.
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.safety.max_concurrent, 5);
        assert_eq!(cfg.safety.max_children, 3);
        assert_eq!(cfg.safety.max_depth, 2);
        assert_eq!(cfg.safety.stale_timeout_minutes, 60);
        assert_eq!(cfg.gateway.breaker_threshold, 5);
        assert_eq!(cfg.gateway.breaker_cooldown_secs, 60);
        assert_eq!(cfg.scheduler.history_keep, 100);
    }

    #[test]
    fn toml_roundtrip() {
        let raw = r#"
[server]
host = "0.0.0.0"
port = 9000
allowed_origins = ["http://localhost:5173"]

[safety]
max_concurrent = 8
"#;
        let cfg = RuntimeConfig::from_toml(raw).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.safety.max_concurrent, 8);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.safety.max_children, 3);
    }

    #[test]
    fn unknown_key_rejected() {
        let raw = "[server]\nhost = \"x\"\nmystery = 1\n";
        assert!(matches!(
            RuntimeConfig::from_toml(raw),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn load_reads_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarmgate.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();

        let cfg = RuntimeConfig::load(&path).unwrap();
        assert_eq!(cfg.server.port, 9999);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.safety.max_concurrent, 5);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.port, ServerConfig::default().port);
    }

    #[test]
    fn load_broken_file_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarmgate.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
