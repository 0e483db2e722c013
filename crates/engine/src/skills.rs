//! The skill capability interface.
//!
//! Domain tools (social posting, market data, and the rest) live
//! outside the core; what the engine consumes is this single trait.
//! Implementations are registered explicitly at startup — never
//! discovered by scanning.

use std::collections::HashMap;
use std::sync::Arc;

use sw_domain::error::{Error, Result};

#[async_trait::async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke one function of the skill with JSON arguments, returning
    /// a JSON result.
    async fn invoke(&self, function: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_owned();
        if self.skills.insert(name.clone(), skill).is_some() {
            tracing::warn!(skill = %name, "skill re-registered, previous implementation replaced");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Skill>> {
        self.skills
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Other(format!("skill '{name}' is not registered")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Skill for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            function: &str,
            args: serde_json::Value,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "function": function, "args": args }))
        }
    }

    #[tokio::test]
    async fn register_and_invoke() {
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(Echo));
        assert_eq!(registry.names(), vec!["echo".to_string()]);

        let skill = registry.get("echo").unwrap();
        let out = skill
            .invoke("say", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out["function"], "say");
        assert_eq!(out["args"]["text"], "hi");
    }

    #[test]
    fn unknown_skill_errors() {
        let registry = SkillRegistry::new();
        assert!(registry.get("ghost").is_err());
    }
}
