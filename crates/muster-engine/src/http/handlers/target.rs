//! Target-role handlers: health, lifecycle, and the task slot.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;

use muster_core::TaskId;

use crate::executor::ExecutorError;
use crate::http::responses::ErrorResponse;
use crate::http::TargetCtx;

/// Health probe from the server.
pub async fn refresh(State(ctx): State<Arc<TargetCtx>>) -> impl IntoResponse {
    if ctx.executor.is_retired() {
        (StatusCode::CONFLICT, "NAK")
    } else {
        (StatusCode::OK, "ACK")
    }
}

/// Status document for this target.
pub async fn status(State(ctx): State<Arc<TargetCtx>>) -> impl IntoResponse {
    Json(ctx.executor.status_document())
}

/// Retire this target. Refused while a task is outstanding.
pub async fn retire(State(ctx): State<Arc<TargetCtx>>) -> impl IntoResponse {
    match ctx.executor.retire() {
        Ok(()) => (StatusCode::OK, "ACK"),
        Err(_) => (StatusCode::CONFLICT, "NAK"),
    }
}

/// Accept a task assignment. The optional JSON body is the payload.
pub async fn assign_task(
    State(ctx): State<Arc<TargetCtx>>,
    Path(id): Path<String>,
    payload: Option<Json<Value>>,
) -> impl IntoResponse {
    let payload = payload.map(|Json(v)| v).unwrap_or(Value::Null);
    match ctx.executor.accept(TaskId::new(id), payload) {
        Ok(_) => (StatusCode::OK, "Accepted").into_response(),
        Err(e) => executor_error(e),
    }
}

/// Report a task's current status.
pub async fn task_status(
    State(ctx): State<Arc<TargetCtx>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match ctx.executor.status(&TaskId::new(id)) {
        Some(record) => Json(record).into_response(),
        None => not_found(),
    }
}

/// Cancel a task. Cancelling a finished task answers 200 with the
/// terminal record; that race is benign.
pub async fn cancel_task(
    State(ctx): State<Arc<TargetCtx>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = TaskId::new(id);
    match ctx.executor.cancel(&id) {
        Ok(_) => match ctx.executor.status(&id) {
            Some(record) => Json(record).into_response(),
            None => not_found(),
        },
        Err(ExecutorError::NotFound(_)) => not_found(),
        Err(e) => executor_error(e),
    }
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "unknown task".to_string(),
        }),
    )
        .into_response()
}

fn executor_error(e: ExecutorError) -> axum::response::Response {
    let status = match e {
        ExecutorError::Busy | ExecutorError::Retired | ExecutorError::Duplicate(_) => {
            StatusCode::CONFLICT
        }
        ExecutorError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}
