//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use sw_domain::error::Error;

/// A domain error carried to the HTTP boundary.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{what} not found"),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::ConfigInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PersistenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::PersistenceConflict(_) => StatusCode::CONFLICT,
            Error::SessionClosed(_) => StatusCode::CONFLICT,
            Error::LlmInvariant { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::LlmExhausted(_) => StatusCode::BAD_GATEWAY,
            Error::SafetyVeto(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::SpawnBudgetExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::UnknownAgent(_) => StatusCode::NOT_FOUND,
            Error::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases: Vec<(Error, StatusCode)> = vec![
            (
                Error::PersistenceConflict("dup".into()),
                StatusCode::CONFLICT,
            ),
            (
                Error::PersistenceUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::SessionClosed(uuid::Uuid::nil()),
                StatusCode::CONFLICT,
            ),
            (
                Error::LlmInvariant {
                    model: "m".into(),
                    message: "bad".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                Error::SafetyVeto("open".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::UnknownAgent("x".into()), StatusCode::NOT_FOUND),
            (Error::Timeout("t".into()), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, expected) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, expected);
        }
    }
}
