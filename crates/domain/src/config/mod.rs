mod catalog;
mod runtime;

pub use catalog::{
    AgentRole, AgentSpec, Catalog, CatalogFile, ModelSpec, RatePolicy, RosterFile, Tier,
};
pub use runtime::{
    GatewayConfig, RuntimeConfig, SafetyConfig, SchedulerConfig, ServerConfig, SessionDefaults,
    StoreConfig,
};

use crate::error::{Error, Result};

/// Load and validate both catalog files referenced by the runtime config.
pub fn load_catalog(cfg: &RuntimeConfig) -> Result<Catalog> {
    let catalog_yaml = std::fs::read_to_string(&cfg.catalog_path).map_err(|e| {
        Error::ConfigInvalid(format!("reading {}: {e}", cfg.catalog_path.display()))
    })?;
    let roster_yaml = std::fs::read_to_string(&cfg.roster_path).map_err(|e| {
        Error::ConfigInvalid(format!("reading {}: {e}", cfg.roster_path.display()))
    })?;
    Catalog::from_yaml(&catalog_yaml, &roster_yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_catalog_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("models.yaml");
        let roster_path = dir.path().join("agents.yaml");
        std::fs::write(
            &catalog_path,
            "models:\n  - id: m1\n    provider_id: litellm\n    tier: free\n",
        )
        .unwrap();
        std::fs::write(&roster_path, "agents:\n  - id: devops\n    model: m1\n").unwrap();

        let cfg = RuntimeConfig {
            catalog_path,
            roster_path,
            ..RuntimeConfig::default()
        };

        let catalog = load_catalog(&cfg).unwrap();
        assert_eq!(catalog.agent_count(), 1);
        assert!(catalog.model("m1").is_ok());
    }

    #[test]
    fn load_catalog_missing_file_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig {
            catalog_path: dir.path().join("absent.yaml"),
            roster_path: dir.path().join("also-absent.yaml"),
            ..RuntimeConfig::default()
        };

        assert!(matches!(load_catalog(&cfg), Err(Error::ConfigInvalid(_))));
    }
}
