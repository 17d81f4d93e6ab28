//! Error → wire mapping
//!
//! Two regimes, selected by the configured environment mode:
//!
//! - **prod**: upstream failures (network, plugins, resolvers) degrade to
//!   an *empty, successful* payload so automation clients keep their
//!   schedules; only genuine user errors surface as 4xx.
//! - **dev**: everything surfaces with real status codes and detail in
//!   the body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use crate::config::EnvironmentMode;
use crate::errors::AppError;

/// How a degraded (prod-mode) response should look for an endpoint family
#[derive(Debug, Clone, Copy)]
pub enum EmptyPayload {
    /// Torznab: empty RSS feed
    Rss,
    /// Stremio: `{"streams": []}`
    Streams,
    /// Stremio: `{"metas": []}`
    Metas,
}

pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::BadInput { .. } => StatusCode::BAD_REQUEST,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        // Upstream classes: bad gateway in dev mode.
        AppError::Fetch(_) | AppError::Plugin(_) | AppError::Resolve(_) | AppError::Kv(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Map an error for a feed endpoint, honouring the environment mode.
pub fn feed_error(mode: EnvironmentMode, error: AppError, empty: EmptyPayload) -> Response {
    match &error {
        AppError::BadInput { .. } | AppError::NotFound { .. } => {
            warn!("request error: {}", error);
            return (status_for(&error), error.to_string()).into_response();
        }
        AppError::Internal { .. } => error!("internal error: {}", error),
        _ => warn!("upstream error: {}", error),
    }

    match mode {
        EnvironmentMode::Prod => match empty {
            EmptyPayload::Rss => super::torznab::empty_feed_response(),
            EmptyPayload::Streams => Json(json!({ "streams": [] })).into_response(),
            EmptyPayload::Metas => Json(json!({ "metas": [] })).into_response(),
        },
        EnvironmentMode::Dev => (
            status_for(&error),
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

/// Plain JSON error for the operational endpoints (no prod masking)
pub struct ApiError(pub AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E: Into<AppError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}
