//! HTTP surface of the engine.
//!
//! Three routers, merged per role at startup:
//! - control: `/ping`, `/config` (both roles)
//! - server: `/targets`, `/refresh`, `/dispatch`
//! - target: `/refresh`, `/status`, `/retire`, `/task/{id}`

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::config::ConfigHandle;
use crate::executor::TaskExecutor;
use crate::registry::TargetRegistry;

mod handlers;
pub mod responses;

/// Shared state for the server-role routes.
pub struct ServerCtx {
    pub registry: Arc<TargetRegistry>,
}

/// Shared state for the target-role routes.
pub struct TargetCtx {
    pub executor: Arc<TaskExecutor>,
}

/// Routes exposed regardless of role.
pub fn control_router(config: Arc<ConfigHandle>) -> Router {
    Router::new()
        .route("/ping", get(handlers::control::ping))
        .route(
            "/config",
            get(handlers::control::get_config)
                .post(handlers::control::set_config)
                .put(handlers::control::set_config),
        )
        .with_state(config)
}

/// Server-role routes: registry administration and task dispatch.
pub fn server_router(ctx: Arc<ServerCtx>) -> Router {
    Router::new()
        .route(
            "/targets",
            post(handlers::server::register_target)
                .get(handlers::server::list_targets)
                .delete(handlers::server::retire_target),
        )
        .route("/refresh", post(handlers::server::refresh_targets))
        .route("/dispatch", post(handlers::server::dispatch_task))
        .route(
            "/dispatch/:id",
            get(handlers::server::get_task).delete(handlers::server::cancel_task),
        )
        .with_state(ctx)
}

/// Target-role routes: health, lifecycle, and the task slot.
pub fn target_router(ctx: Arc<TargetCtx>) -> Router {
    Router::new()
        .route("/refresh", get(handlers::target::refresh))
        .route("/status", get(handlers::target::status))
        .route("/retire", delete(handlers::target::retire))
        .route(
            "/task/:id",
            get(handlers::target::assign_task)
                .post(handlers::target::task_status)
                .delete(handlers::target::cancel_task),
        )
        .with_state(ctx)
}
