//! Shared application state threaded through the API handlers, the
//! scheduler, and the pool. Everything is behind an `Arc`; tests build
//! the same struct with fakes injected at the gateway seam.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

use sw_domain::config::{Catalog, RuntimeConfig};
use sw_providers::LlmGateway;
use sw_sessions::SessionService;
use sw_store::Store;

use crate::runtime::cancel::CancelMap;
use crate::runtime::pheromone::PheromoneBoard;
use crate::runtime::pool::AgentPool;
use crate::runtime::rate::RateWindows;
use crate::runtime::safety::SafetyGate;
use crate::skills::SkillRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hot-reloadable catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The catalog pointer. Reload parses and validates a full replacement,
/// then swaps under the write lock — readers clone the `Arc` and keep a
/// consistent view for the duration of their task.
pub struct CatalogHandle {
    inner: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn get(&self) -> Arc<Catalog> {
        self.inner.read().clone()
    }

    pub fn swap(&self, catalog: Catalog) {
        *self.inner.write() = Arc::new(catalog);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RunningJob {
    pub session_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
}

/// Cross-thread view of the scheduler: wake signal plus the in-flight
/// job map (cron id → running run).
pub struct SchedulerHandle {
    notify: Notify,
    running: Mutex<HashMap<String, RunningJob>>,
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Wake the scheduler loop early (entry added/edited/deleted,
    /// catalog reloaded, manual trigger).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn mark_running(&self, cron_id: &str, job: RunningJob) {
        self.running.lock().insert(cron_id.to_owned(), job);
    }

    pub fn clear_running(&self, cron_id: &str) {
        self.running.lock().remove(cron_id);
    }

    pub fn is_running(&self, cron_id: &str) -> bool {
        self.running.lock().contains_key(cron_id)
    }

    pub fn running_session(&self, cron_id: &str) -> Option<Uuid> {
        self.running.lock().get(cron_id).and_then(|j| j.session_id)
    }

    pub fn running_jobs(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.running.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.running.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AppState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared application state.
///
/// Grouped by concern:
/// - **Config** — runtime settings + the reloadable catalog
/// - **Persistence** — store and the session service over it
/// - **LLM** — the gateway (breakers live inside it)
/// - **Runtime** — pool, scheduler, safety gate, cancel map, pheromones
/// - **Security** — the admin-token digest computed at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub catalog: Arc<CatalogHandle>,

    pub store: Arc<Store>,
    pub sessions: Arc<SessionService>,

    pub gateway: Arc<LlmGateway>,

    pub pool: Arc<AgentPool>,
    pub scheduler: Arc<SchedulerHandle>,
    pub safety: Arc<SafetyGate>,
    pub cancel_map: Arc<CancelMap>,
    pub pheromones: Arc<PheromoneBoard>,
    pub rates: Arc<RateWindows>,
    pub skills: Arc<SkillRegistry>,

    /// SHA-256 digest of `ADMIN_TOKEN`, read once at startup.
    /// `None` = dev mode, no auth enforced.
    pub admin_token_hash: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_domain::config::{CatalogFile, RosterFile, Tier};

    fn catalog(n_models: usize) -> Catalog {
        let models = (0..n_models)
            .map(|i| sw_domain::config::ModelSpec {
                id: format!("m{i}"),
                provider_id: "litellm".into(),
                endpoint: "http://localhost:4000".into(),
                context_window: 1000,
                input_cost_per_1k: 0.0,
                output_cost_per_1k: 0.0,
                tier: Tier::Free,
                supports_tools: false,
            })
            .collect();
        Catalog::build(
            CatalogFile {
                models,
                tier_order: vec![Tier::Free],
            },
            RosterFile { agents: vec![] },
        )
        .unwrap()
    }

    #[test]
    fn catalog_swap_is_visible_to_new_readers() {
        let handle = CatalogHandle::new(catalog(1));
        let before = handle.get();
        handle.swap(catalog(2));
        let after = handle.get();

        // The old Arc stays valid for in-flight holders.
        assert!(before.model("m1").is_err());
        assert!(after.model("m1").is_ok());
    }

    #[test]
    fn scheduler_handle_running_map() {
        let handle = SchedulerHandle::new();
        assert!(!handle.is_running("job"));

        handle.mark_running(
            "job",
            RunningJob {
                session_id: None,
                started_at: Utc::now(),
            },
        );
        assert!(handle.is_running("job"));
        assert_eq!(handle.running_jobs(), vec!["job".to_string()]);
        assert_eq!(handle.active_count(), 1);

        handle.clear_running("job");
        assert!(!handle.is_running("job"));
    }
}
