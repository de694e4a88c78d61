//! Muster Role Engine
//!
//! This crate provides the dual-mode engine behind the `muster` binary:
//! server-side target registry and task dispatch, target-side task
//! execution, and the shared HTTP control surface.

pub mod config;
pub mod engine;
pub mod executor;
pub mod http;
pub mod plugin;
pub mod proxy;
pub mod registry;
pub mod transport;

pub use config::{ConfigHandle, EngineConfig, Role};
pub use engine::{Engine, EngineError, EngineStatus, RunningEngine};
pub use executor::{CommandRunner, TaskExecutor, TaskRunner};
pub use plugin::Plugin;
pub use proxy::TargetProxy;
pub use registry::{RegistryError, RetireOutcome, TargetRegistry};
pub use transport::{ProxyError, TargetTransport};
