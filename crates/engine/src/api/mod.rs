pub mod admin;
pub mod agents;
pub mod auth;
pub mod chat;
pub mod cron;
pub mod error;
pub mod ws;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// `/health` is public; everything else sits behind the `ADMIN_TOKEN`
/// bearer middleware (a no-op in dev mode when the token is unset).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(admin::health));

    let protected = Router::new()
        // Chat sessions
        .route("/chat/sessions", post(chat::create_session))
        .route("/chat/sessions/:id", get(chat::get_session))
        .route("/chat/sessions/:id", delete(chat::end_session))
        .route("/chat/sessions/:id/messages", post(chat::post_message))
        .route("/chat/sessions/:id/export", get(chat::export_session))
        // Streaming chat
        .route("/ws/chat/:session_id", get(ws::chat_ws))
        // Cron management
        .route("/cron", get(cron::list_crons))
        .route("/cron", post(cron::create_cron))
        .route("/cron/status", get(cron::cron_status))
        .route("/cron/:id", get(cron::get_cron))
        .route("/cron/:id", put(cron::update_cron))
        .route("/cron/:id", delete(cron::delete_cron))
        .route("/cron/:id/trigger", post(cron::trigger_cron))
        .route("/cron/:id/history", get(cron::cron_history))
        // Agent pool
        .route("/agents", get(agents::list_agents))
        .route("/agents/:id", get(agents::get_agent))
        // Admin
        .route("/admin/reload", post(admin::reload_config))
        .route("/admin/breakers", get(admin::breakers))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_admin_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
