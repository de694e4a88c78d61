//! The dual-mode role engine.
//!
//! A single process runs as either a server (registry + dispatch) or a
//! target (task slot + execution), resolved once from configuration at
//! construction. The two variants share the control routes and the
//! lifecycle machinery; each owns only the resources its role needs.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::{ConfigError, ConfigHandle, Role};
use crate::executor::{CommandRunner, TaskExecutor, TaskRunner};
use crate::http::{self, ServerCtx, TargetCtx};
use crate::plugin::{merge_plugin_routes, Plugin};
use crate::registry::TargetRegistry;

/// Engine lifecycle errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The control-plane port could not be bound. Fatal to startup.
    #[error("Failed to bind control listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

enum RoleVariant {
    Server { registry: Arc<TargetRegistry> },
    Target { executor: Arc<TaskExecutor> },
}

/// A constructed-but-not-started engine.
pub struct Engine {
    config: Arc<ConfigHandle>,
    variant: RoleVariant,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Engine {
    /// Resolve the role from the current configuration snapshot and
    /// build the matching variant.
    pub fn from_config(config: Arc<ConfigHandle>, plugins: Vec<Box<dyn Plugin>>) -> Self {
        let snapshot = config.snapshot();
        let variant = match snapshot.role {
            Role::Server => RoleVariant::Server {
                registry: Arc::new(TargetRegistry::new(snapshot.request_timeout)),
            },
            Role::Target => {
                let runner: Arc<dyn TaskRunner> =
                    Arc::new(CommandRunner::new(snapshot.environment()));
                RoleVariant::Target {
                    executor: Arc::new(TaskExecutor::new(runner)),
                }
            }
        };
        Self {
            config,
            variant,
            plugins,
        }
    }

    /// Build a target-role engine around a caller-supplied runner.
    pub fn target_with_runner(config: Arc<ConfigHandle>, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            config,
            variant: RoleVariant::Target {
                executor: Arc::new(TaskExecutor::new(runner)),
            },
            plugins: Vec::new(),
        }
    }

    /// The resolved role.
    pub fn role(&self) -> Role {
        match &self.variant {
            RoleVariant::Server { .. } => Role::Server,
            RoleVariant::Target { .. } => Role::Target,
        }
    }

    /// The server-role registry, if this engine is a server.
    pub fn registry(&self) -> Option<Arc<TargetRegistry>> {
        match &self.variant {
            RoleVariant::Server { registry } => Some(registry.clone()),
            RoleVariant::Target { .. } => None,
        }
    }

    /// The target-role executor, if this engine is a target.
    pub fn executor(&self) -> Option<Arc<TaskExecutor>> {
        match &self.variant {
            RoleVariant::Server { .. } => None,
            RoleVariant::Target { executor } => Some(executor.clone()),
        }
    }

    /// Bind the listener and start serving.
    ///
    /// `Created -> Starting -> Running`, or `Starting -> Failed` when
    /// the port is taken.
    pub async fn start(self) -> Result<RunningEngine, EngineError> {
        let snapshot = self.config.snapshot();
        let role = self.role();
        info!(role = %role, port = snapshot.port, "Starting engine");

        let addr = SocketAddr::from(([0, 0, 0, 0], snapshot.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(port = snapshot.port, error = %e, "Failed to bind control listener");
            EngineError::Bind {
                port: snapshot.port,
                source: e,
            }
        })?;
        // Port 0 means "pick one"; report what we actually got.
        let addr = listener.local_addr().map_err(|e| EngineError::Bind {
            port: snapshot.port,
            source: e,
        })?;

        let shutdown = CancellationToken::new();
        let mut monitor = None;

        let role_router = match &self.variant {
            RoleVariant::Server { registry } => {
                // Targets named in configuration are registered before
                // the listener starts taking dispatch requests.
                for url in snapshot.targets() {
                    registry.register(url, serde_json::Value::Null).await;
                }

                monitor = Some(tokio::spawn(run_monitor_loop(
                    registry.clone(),
                    self.config.clone(),
                    shutdown.clone(),
                )));

                http::server_router(Arc::new(ServerCtx {
                    registry: registry.clone(),
                }))
            }
            RoleVariant::Target { executor } => http::target_router(Arc::new(TargetCtx {
                executor: executor.clone(),
            })),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = http::control_router(self.config.clone()).merge(role_router);
        let router = merge_plugin_routes(router, &self.plugins, &snapshot.plugins())
            .layer(TraceLayer::new_for_http())
            .layer(cors);

        let serve_shutdown = shutdown.clone();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        });

        info!(role = %role, addr = %addr, "Engine listening");

        Ok(RunningEngine {
            addr,
            shutdown,
            serve: Mutex::new(Some(serve)),
            monitor: Mutex::new(monitor),
            status: Mutex::new(EngineStatus::Running),
        })
    }
}

/// A started engine: holds the shutdown token and serve task.
#[derive(Debug)]
pub struct RunningEngine {
    addr: SocketAddr,
    shutdown: CancellationToken,
    serve: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    status: Mutex<EngineStatus>,
}

impl RunningEngine {
    /// The bound listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current lifecycle status.
    pub fn status(&self) -> EngineStatus {
        *self.status.lock().unwrap()
    }

    /// Stop serving. Idempotent: stopping a stopped engine is a no-op
    /// that succeeds.
    pub async fn stop(&self) {
        {
            let mut status = self.status.lock().unwrap();
            if *status != EngineStatus::Running {
                return;
            }
            *status = EngineStatus::Stopping;
        }

        info!(addr = %self.addr, "Stopping engine");
        self.shutdown.cancel();

        let serve = self.serve.lock().unwrap().take();
        if let Some(handle) = serve {
            let _ = handle.await;
        }
        let monitor = self.monitor.lock().unwrap().take();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        *self.status.lock().unwrap() = EngineStatus::Stopped;
        info!(addr = %self.addr, "Engine stopped");
    }

    /// Wait until the serve task exits (shutdown or failure).
    pub async fn wait(&self) {
        let serve = self.serve.lock().unwrap().take();
        if let Some(handle) = serve {
            let _ = handle.await;
        }
    }
}

/// Periodic fleet maintenance: refresh every target, then poll every
/// outstanding task. Tick interval comes from the snapshot taken at
/// startup.
async fn run_monitor_loop(
    registry: Arc<TargetRegistry>,
    config: Arc<ConfigHandle>,
    shutdown: CancellationToken,
) {
    let interval = config.snapshot().refresh_interval;
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup registration
    // settles first.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                registry.refresh_all().await;
                registry.poll_outstanding().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use async_trait::async_trait;
    use muster_core::{TargetUrl, TaskId, TaskRecord, TaskStatus};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn handle(doc: serde_json::Value) -> Arc<ConfigHandle> {
        Arc::new(ConfigHandle::in_memory(
            EngineConfig::from_value(doc).unwrap(),
        ))
    }

    #[test]
    fn test_role_resolver() {
        let server = Engine::from_config(handle(json!({"role": "server"})), Vec::new());
        assert_eq!(server.role(), Role::Server);
        assert!(server.registry().is_some());
        assert!(server.executor().is_none());

        let target = Engine::from_config(handle(json!({"role": "target"})), Vec::new());
        assert_eq!(target.role(), Role::Target);
        assert!(target.registry().is_none());
        assert!(target.executor().is_some());
    }

    #[tokio::test]
    async fn test_start_and_idempotent_stop() {
        // Port 0: the OS picks a free port.
        let engine = Engine::from_config(handle(json!({"role": "target", "port": 0})), Vec::new());
        let running = engine.start().await.unwrap();
        assert_eq!(running.status(), EngineStatus::Running);
        assert_ne!(running.addr().port(), 0);

        running.stop().await;
        assert_eq!(running.status(), EngineStatus::Stopped);

        // Second stop: harmless no-op.
        running.stop().await;
        assert_eq!(running.status(), EngineStatus::Stopped);
    }

    /// Runner that completes immediately.
    struct OkRunner;

    #[async_trait]
    impl TaskRunner for OkRunner {
        async fn run(
            &self,
            _id: &TaskId,
            _payload: &Value,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_round_trip_over_http() {
        let target = Engine::target_with_runner(
            handle(json!({"role": "target", "port": 0})),
            Arc::new(OkRunner),
        );
        let running_target = target.start().await.unwrap();
        let target_url = format!("http://127.0.0.1:{}", running_target.addr().port());

        let server = Engine::from_config(handle(json!({"role": "server", "port": 0})), Vec::new());
        let registry = server.registry().unwrap();
        let running_server = server.start().await.unwrap();

        registry
            .register(TargetUrl::new(&target_url), json!({}))
            .await;

        let record = registry
            .dispatch(TaskRecord::new(TaskId::new("t1"), json!({})))
            .await
            .unwrap();
        assert_eq!(record.status, TaskStatus::Assigned);

        // The server observes completion through its status polls.
        let mut status = record.status;
        for _ in 0..100 {
            registry.poll_outstanding().await;
            status = registry.task(&TaskId::new("t1")).await.unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, TaskStatus::Succeeded);
        assert!(!registry
            .get(&TargetUrl::new(&target_url))
            .await
            .unwrap()
            .is_busy());

        // Shared control routes answer on both roles.
        let pong = reqwest::get(format!("{}/ping", target_url))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(pong, "Pong");

        let client = reqwest::Client::new();
        let nak = client
            .post(format!("{}/config", target_url))
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(nak.status().as_u16(), 409);
        assert_eq!(nak.text().await.unwrap(), "NAK");

        running_server.stop().await;
        running_target.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_start() {
        let first = Engine::from_config(handle(json!({"role": "target", "port": 0})), Vec::new());
        let running = first.start().await.unwrap();
        let port = running.addr().port();

        let second =
            Engine::from_config(handle(json!({"role": "target", "port": port})), Vec::new());
        let err = second.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Bind { .. }));

        running.stop().await;
    }
}
