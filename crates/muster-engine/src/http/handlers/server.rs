//! Server-role handlers: registry administration and task dispatch.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::warn;

use muster_core::{TargetUrl, TaskId, TaskRecord};

use crate::http::responses::{
    DispatchRequest, ErrorResponse, RegisterRequest, RetireRequest, RetireResponse,
};
use crate::http::ServerCtx;
use crate::registry::{RegistryError, RetireOutcome};

/// Register a target (or update its metadata).
pub async fn register_target(
    State(ctx): State<Arc<ServerCtx>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.url.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "url must not be empty".to_string(),
            }),
        )
            .into_response();
    }
    let state = ctx
        .registry
        .register(TargetUrl::new(req.url), req.metadata)
        .await;
    Json(state).into_response()
}

/// List every registered target in registration order.
pub async fn list_targets(State(ctx): State<Arc<ServerCtx>>) -> impl IntoResponse {
    Json(ctx.registry.list().await)
}

/// Retire a target through its proxy.
pub async fn retire_target(
    State(ctx): State<Arc<ServerCtx>>,
    Json(req): Json<RetireRequest>,
) -> impl IntoResponse {
    let url = TargetUrl::new(req.url);
    match ctx.registry.retire(&url, req.force).await {
        Ok(outcome) => {
            let outcome = match outcome {
                RetireOutcome::Retired => "retired",
                RetireOutcome::AlreadyRetired => "already_retired",
            };
            Json(RetireResponse {
                url: url.into_inner(),
                outcome: outcome.to_string(),
            })
            .into_response()
        }
        Err(e) => registry_error(e),
    }
}

/// Probe every non-retired target concurrently.
pub async fn refresh_targets(State(ctx): State<Arc<ServerCtx>>) -> impl IntoResponse {
    Json(ctx.registry.refresh_all().await)
}

/// Create a task and dispatch it to the first available target.
pub async fn dispatch_task(
    State(ctx): State<Arc<ServerCtx>>,
    Json(req): Json<DispatchRequest>,
) -> impl IntoResponse {
    let id = req
        .id
        .map(TaskId::new)
        .unwrap_or_else(TaskId::generate);
    let task = TaskRecord::new(id, req.payload);

    match ctx.registry.dispatch(task).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Server-side record for one task.
pub async fn get_task(
    State(ctx): State<Arc<ServerCtx>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = TaskId::new(id);
    match ctx.registry.task(&id).await {
        Some(record) => Json(record).into_response(),
        None => registry_error(RegistryError::TaskNotFound(id)),
    }
}

/// Cancel a dispatched task through its target.
pub async fn cancel_task(
    State(ctx): State<Arc<ServerCtx>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match ctx.registry.cancel(&TaskId::new(id)).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Map registry errors onto the REST surface: transport failures are
/// 502, state conflicts 409, missing things 404, no capacity 503.
fn registry_error(e: RegistryError) -> axum::response::Response {
    let status = match &e {
        RegistryError::NoTargetAvailable => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::TargetNotFound(_) | RegistryError::TaskNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        RegistryError::SlotOccupied(_)
        | RegistryError::TargetRetired(_)
        | RegistryError::NotAvailable(_)
        | RegistryError::RetirementRejected(_)
        | RegistryError::TaskExists(_) => StatusCode::CONFLICT,
        RegistryError::InvalidTask(_) => StatusCode::BAD_REQUEST,
        RegistryError::AssignmentFailed { .. } | RegistryError::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    warn!(status = %status, error = %e, "Request failed");
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}
