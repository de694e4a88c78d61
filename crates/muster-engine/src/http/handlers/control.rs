//! Shared control routes: liveness and configuration.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::warn;

use crate::config::ConfigHandle;

/// Liveness probe.
pub async fn ping() -> &'static str {
    "Pong"
}

/// Return the current configuration snapshot.
pub async fn get_config(State(config): State<Arc<ConfigHandle>>) -> impl IntoResponse {
    Json(config.snapshot().document().clone())
}

/// Replace the configuration document: validate, persist, swap.
///
/// Any malformed input answers `409 "NAK"` and leaves the previous
/// snapshot active. The body is read as raw text so a syntactically
/// broken document gets the same NAK as a semantically invalid one.
pub async fn set_config(
    State(config): State<Arc<ConfigHandle>>,
    body: String,
) -> impl IntoResponse {
    let doc = match serde_json::from_str(&body) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "Rejected unparseable config document");
            return (StatusCode::CONFLICT, "NAK");
        }
    };

    match config.replace(doc) {
        Ok(()) => (StatusCode::OK, "ACK"),
        Err(e) => {
            warn!(error = %e, "Rejected invalid config document");
            (StatusCode::CONFLICT, "NAK")
        }
    }
}
