//! Model catalog + agent roster.
//!
//! Loaded from YAML at startup and on explicit reload. The catalog is
//! immutable per load; the engine swaps the whole `Arc<Catalog>` on
//! reload so no in-flight request observes a half-swapped view.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model specs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cost/escalation tier of a model. Tier order doubles as the default
/// fallback escalation order when an agent's explicit chain is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Free,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub id: String,
    pub provider_id: String,
    /// Endpoint base URL, e.g. `http://litellm:4000`. Empty means the
    /// gateway's configured default endpoint.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "d_context_window")]
    pub context_window: u32,
    #[serde(default)]
    pub input_cost_per_1k: f64,
    #[serde(default)]
    pub output_cost_per_1k: f64,
    pub tier: Tier,
    #[serde(default)]
    pub supports_tools: bool,
}

impl ModelSpec {
    /// Estimated USD cost for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_cost_per_1k
            + output_tokens as f64 * self.output_cost_per_1k)
            / 1_000.0
    }
}

fn d_context_window() -> u32 {
    32_768
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent roster
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    #[default]
    Coordinator,
    SubAgent,
    System,
}

/// Per-agent rate limit. 0 = unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RatePolicy {
    #[serde(default)]
    pub max_calls_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub id: String,
    /// Primary model id.
    pub model: String,
    /// Ordered fallback model ids, tried after the primary.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Optional parent agent (sub-agents only).
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub role: AgentRole,
    /// Identity/context files prepended to the system prompt.
    #[serde(default)]
    pub mind_files: Vec<PathBuf>,
    /// Per-call timeout in seconds.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate: RatePolicy,
    /// Capability tags used for routing tie-breaks.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn d_timeout_secs() -> u64 {
    120
}

impl AgentSpec {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// YAML document shape for the model catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    pub models: Vec<ModelSpec>,
    /// Default escalation order when an agent's chain is exhausted.
    #[serde(default = "d_tier_order")]
    pub tier_order: Vec<Tier>,
}

fn d_tier_order() -> Vec<Tier> {
    vec![Tier::Local, Tier::Free, Tier::Paid]
}

/// YAML document shape for the agent roster file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterFile {
    pub agents: Vec<AgentSpec>,
}

/// The validated, immutable view the whole runtime works against.
#[derive(Debug, Clone)]
pub struct Catalog {
    models: HashMap<String, ModelSpec>,
    agents: HashMap<String, AgentSpec>,
    tier_order: Vec<Tier>,
}

impl Catalog {
    /// Assemble and validate a catalog from the two parsed files.
    pub fn build(catalog: CatalogFile, roster: RosterFile) -> Result<Self> {
        let mut models = HashMap::new();
        for m in catalog.models {
            let id = m.id.clone();
            if models.insert(id.clone(), m).is_some() {
                return Err(Error::ConfigInvalid(format!("duplicate model id '{id}'")));
            }
        }
        let mut agents = HashMap::new();
        for a in roster.agents {
            if let Some(prev) = agents.insert(a.id.clone(), a) {
                return Err(Error::ConfigInvalid(format!(
                    "duplicate agent id '{}'",
                    prev.id
                )));
            }
        }

        let cat = Self {
            models,
            agents,
            tier_order: catalog.tier_order,
        };
        cat.validate()?;
        Ok(cat)
    }

    /// Parse both YAML documents and build the catalog.
    pub fn from_yaml(catalog_yaml: &str, roster_yaml: &str) -> Result<Self> {
        let catalog: CatalogFile = serde_yaml::from_str(catalog_yaml)
            .map_err(|e| Error::ConfigInvalid(format!("model catalog: {e}")))?;
        let roster: RosterFile = serde_yaml::from_str(roster_yaml)
            .map_err(|e| Error::ConfigInvalid(format!("agent roster: {e}")))?;
        Self::build(catalog, roster)
    }

    fn validate(&self) -> Result<()> {
        if self.tier_order.is_empty() {
            return Err(Error::ConfigInvalid("tier_order is empty".into()));
        }

        for agent in self.agents.values() {
            if !self.models.contains_key(&agent.model) {
                return Err(Error::ConfigInvalid(format!(
                    "agent '{}' references unknown model '{}'",
                    agent.id, agent.model
                )));
            }
            for fb in &agent.fallbacks {
                if !self.models.contains_key(fb) {
                    return Err(Error::ConfigInvalid(format!(
                        "agent '{}' fallback references unknown model '{fb}'",
                        agent.id
                    )));
                }
            }
            if let Some(parent) = &agent.parent {
                if !self.agents.contains_key(parent) {
                    return Err(Error::ConfigInvalid(format!(
                        "agent '{}' references unknown parent '{parent}'",
                        agent.id
                    )));
                }
            }
        }

        // Parent chains must be acyclic. Walk each chain; a chain longer
        // than the roster means a loop.
        for agent in self.agents.values() {
            let mut hops = 0usize;
            let mut cursor = agent.parent.as_deref();
            while let Some(parent_id) = cursor {
                hops += 1;
                if hops > self.agents.len() {
                    return Err(Error::ConfigInvalid(format!(
                        "cycle in agent parent chain starting at '{}'",
                        agent.id
                    )));
                }
                cursor = self
                    .agents
                    .get(parent_id)
                    .and_then(|p| p.parent.as_deref());
            }
        }

        Ok(())
    }

    pub fn agent(&self, id: &str) -> Result<&AgentSpec> {
        self.agents
            .get(id)
            .ok_or_else(|| Error::UnknownAgent(id.to_owned()))
    }

    pub fn model(&self, id: &str) -> Result<&ModelSpec> {
        self.models
            .get(id)
            .ok_or_else(|| Error::ConfigInvalid(format!("unknown model '{id}'")))
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// The ordered candidate list for an agent: primary, then its
    /// declared fallbacks, then the default tier escalation order.
    /// Deduplicated, first occurrence wins, so the order is stable for
    /// a given (agent, catalog) pair.
    pub fn candidate_models(&self, agent: &AgentSpec) -> Vec<&ModelSpec> {
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut out: Vec<&ModelSpec> = Vec::new();

        let declared = std::iter::once(agent.model.as_str())
            .chain(agent.fallbacks.iter().map(String::as_str));
        for id in declared {
            if let Some(spec) = self.models.get(id) {
                if seen.insert(spec.id.as_str()) {
                    out.push(spec);
                }
            }
        }

        for tier in &self.tier_order {
            let mut tier_models: Vec<&ModelSpec> = self
                .models
                .values()
                .filter(|m| m.tier == *tier)
                .collect();
            tier_models.sort_by(|a, b| a.id.cmp(&b.id));
            for spec in tier_models {
                if seen.insert(spec.id.as_str()) {
                    out.push(spec);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, tier: Tier) -> ModelSpec {
        ModelSpec {
            id: id.into(),
            provider_id: "litellm".into(),
            endpoint: "http://localhost:4000".into(),
            context_window: 32_768,
            input_cost_per_1k: 0.001,
            output_cost_per_1k: 0.002,
            tier,
            supports_tools: true,
        }
    }

    fn agent(id: &str, model: &str, fallbacks: &[&str]) -> AgentSpec {
        AgentSpec {
            id: id.into(),
            model: model.into(),
            fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
            parent: None,
            role: AgentRole::Coordinator,
            mind_files: vec![],
            timeout_secs: 120,
            rate: RatePolicy::default(),
            tags: vec![],
        }
    }

    fn build(models: Vec<ModelSpec>, agents: Vec<AgentSpec>) -> Result<Catalog> {
        Catalog::build(
            CatalogFile {
                models,
                tier_order: vec![Tier::Local, Tier::Free, Tier::Paid],
            },
            RosterFile { agents },
        )
    }

    #[test]
    fn candidate_order_primary_fallbacks_then_tiers() {
        let cat = build(
            vec![
                model("m-local", Tier::Local),
                model("m-free", Tier::Free),
                model("m-paid", Tier::Paid),
            ],
            vec![agent("devops", "m-paid", &["m-free"])],
        )
        .unwrap();

        let a = cat.agent("devops").unwrap();
        let ids: Vec<&str> = cat
            .candidate_models(a)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        // Primary first, declared fallback next, then the remaining
        // tier-order models exactly once.
        assert_eq!(ids, vec!["m-paid", "m-free", "m-local"]);
    }

    #[test]
    fn candidate_order_dedups_first_occurrence() {
        let cat = build(
            vec![model("m1", Tier::Free), model("m2", Tier::Free)],
            vec![agent("a", "m1", &["m1", "m2"])],
        )
        .unwrap();
        let ids: Vec<&str> = cat
            .candidate_models(cat.agent("a").unwrap())
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn unknown_model_rejected() {
        let err = build(
            vec![model("m1", Tier::Free)],
            vec![agent("a", "missing", &[])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn unknown_fallback_rejected() {
        let err = build(
            vec![model("m1", Tier::Free)],
            vec![agent("a", "m1", &["missing"])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn parent_cycle_rejected() {
        let mut a = agent("a", "m1", &[]);
        a.parent = Some("b".into());
        let mut b = agent("b", "m1", &[]);
        b.parent = Some("a".into());
        let err = build(vec![model("m1", Tier::Free)], vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn unknown_parent_rejected() {
        let mut a = agent("a", "m1", &[]);
        a.parent = Some("ghost".into());
        let err = build(vec![model("m1", Tier::Free)], vec![a]).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn valid_parent_chain_accepted() {
        let root = agent("root", "m1", &[]);
        let mut child = agent("child", "m1", &[]);
        child.parent = Some("root".into());
        child.role = AgentRole::SubAgent;
        let cat = build(vec![model("m1", Tier::Free)], vec![root, child]).unwrap();
        assert_eq!(cat.agent_count(), 2);
    }

    #[test]
    fn unknown_agent_lookup() {
        let cat = build(vec![model("m1", Tier::Free)], vec![]).unwrap();
        assert!(matches!(cat.agent("nobody"), Err(Error::UnknownAgent(_))));
    }

    #[test]
    fn cost_estimate_per_1k() {
        let m = model("m1", Tier::Paid);
        // 2000 in @ 0.001/1k + 1000 out @ 0.002/1k = 0.002 + 0.002
        let cost = m.estimate_cost(2_000, 1_000);
        assert!((cost - 0.004).abs() < 1e-12);
    }

    #[test]
    fn from_yaml_parses() {
        let catalog_yaml = r#"
models:
  - id: m1
    provider_id: litellm
    endpoint: http://localhost:4000
    tier: free
tier_order: [local, free, paid]
"#;
        let roster_yaml = r#"
agents:
  - id: devops
    model: m1
"#;
        let cat = Catalog::from_yaml(catalog_yaml, roster_yaml).unwrap();
        assert_eq!(cat.agent("devops").unwrap().timeout_secs, 120);
    }

    #[test]
    fn from_yaml_rejects_unknown_keys() {
        let catalog_yaml = r#"
models:
  - id: m1
    provider_id: litellm
    endpoint: http://localhost:4000
    tier: free
    surprise: true
"#;
        let err = Catalog::from_yaml(catalog_yaml, "agents: []").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn from_yaml_rejects_unknown_tier() {
        let catalog_yaml = r#"
models:
  - id: m1
    provider_id: litellm
    endpoint: http://localhost:4000
    tier: platinum
"#;
        let err = Catalog::from_yaml(catalog_yaml, "agents: []").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }
}
