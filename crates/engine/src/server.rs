//! Server assembly: staged startup of every component, then the axum
//! listener. Fails fast with the documented exit-code classes — config
//! errors before the store is touched, store errors before anything is
//! scheduled.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use sw_domain::error::{Error, Result};
use sw_providers::{BreakerRegistry, HttpChatBackend, LlmGateway};
use sw_sessions::SessionService;
use sw_store::Store;

use crate::api;
use crate::cli::load_config;
use crate::runtime::cancel::CancelMap;
use crate::runtime::pheromone::PheromoneBoard;
use crate::runtime::pool::AgentPool;
use crate::runtime::rate::RateWindows;
use crate::runtime::safety::SafetyGate;
use crate::runtime::scheduler::Scheduler;
use crate::skills::SkillRegistry;
use crate::state::{AppState, CatalogHandle, SchedulerHandle};
use crate::usage::StoreUsageSink;

pub async fn run_server(config_path: &std::path::Path) -> Result<()> {
    tracing::info!("swarmgate starting");

    // ── Config + catalog ─────────────────────────────────────────────
    let config = load_config(config_path)?;
    let catalog = sw_domain::config::load_catalog(&config)?;
    tracing::info!(
        agents = catalog.agent_count(),
        catalog = %config.catalog_path.display(),
        roster = %config.roster_path.display(),
        "catalog loaded"
    );

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(
        Store::connect(&config.store.database_url, config.store.max_connections).await?,
    );
    tracing::info!("store connected, migrations applied");

    let sessions = Arc::new(SessionService::new(store.clone()));

    // ── LLM gateway ──────────────────────────────────────────────────
    let api_key = std::env::var(&config.gateway.api_key_env)
        .ok()
        .filter(|k| !k.is_empty());
    if api_key.is_none() {
        tracing::warn!(
            env_var = %config.gateway.api_key_env,
            "no gateway API key configured — requests go out unauthenticated"
        );
    }
    let backend = Arc::new(HttpChatBackend::new(api_key)?);
    let breakers = Arc::new(BreakerRegistry::new(
        config.gateway.breaker_threshold,
        Duration::from_secs(config.gateway.breaker_cooldown_secs),
    ));
    let usage = Arc::new(StoreUsageSink::new(store.clone()));
    let gateway = Arc::new(LlmGateway::new(
        backend,
        breakers,
        usage,
        config.gateway.base_url.clone(),
    ));
    tracing::info!(base_url = %config.gateway.base_url, "LLM gateway ready");

    // ── Runtime ──────────────────────────────────────────────────────
    let pool = Arc::new(AgentPool::new(config.safety.max_concurrent));
    let safety = Arc::new(SafetyGate::new(config.safety));
    tracing::info!(
        max_concurrent = config.safety.max_concurrent,
        max_children = config.safety.max_children,
        max_depth = config.safety.max_depth,
        "agent pool + safety layer ready"
    );

    // Skill implementations are registered here, explicitly. The core
    // ships none; deployments add their own.
    let skills = SkillRegistry::new();
    if skills.is_empty() {
        tracing::info!("no skills registered");
    }

    let admin_token_hash = api::auth::admin_token_hash_from_env();

    let state = AppState {
        config: Arc::new(config),
        catalog: Arc::new(CatalogHandle::new(catalog)),
        store,
        sessions,
        gateway,
        pool,
        scheduler: Arc::new(SchedulerHandle::new()),
        safety,
        cancel_map: Arc::new(CancelMap::new()),
        pheromones: Arc::new(PheromoneBoard::new()),
        rates: Arc::new(RateWindows::new()),
        skills: Arc::new(skills),
        admin_token_hash,
    };

    // ── Scheduler loop ───────────────────────────────────────────────
    Scheduler::spawn(state.clone());

    // ── Periodic rate-window pruning ─────────────────────────────────
    {
        let rates = state.rates.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                rates.prune_idle();
            }
        });
    }

    // ── HTTP surface ─────────────────────────────────────────────────
    let cors = build_cors_layer(&state.config.server.allowed_origins);
    let app = api::router(state.clone())
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state.clone());

    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(Error::Io)?;
    tracing::info!(addr = %addr, "swarmgate listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Other(format!("server error: {e}")))
}

/// CORS from the configured origins: a lone `"*"` allows everything
/// (dev), otherwise only the exact listed origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return base.allow_origin(tower_http::cors::Any);
    }

    let exact: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(exact))
}
