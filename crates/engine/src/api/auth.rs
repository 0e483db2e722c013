//! Admin-token authentication.
//!
//! `ADMIN_TOKEN` is read once at startup and cached as a SHA-256
//! digest in `AppState`. When set, every protected request must carry
//! `Authorization: Bearer <token>`; when unset the server warns once
//! and allows everything (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.admin_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash to a fixed length, then constant-time compare.
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing admin token" })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Compute the startup digest from the `ADMIN_TOKEN` env var.
pub fn admin_token_hash_from_env() -> Option<Vec<u8>> {
    match std::env::var("ADMIN_TOKEN") {
        Ok(token) if !token.is_empty() => {
            tracing::info!("admin bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("admin bearer-token auth DISABLED — set ADMIN_TOKEN to enable");
            None
        }
    }
}
