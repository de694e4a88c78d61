//! Muster Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Runtime specifics
//!
//! All types here represent the core business domain of Muster: tasks
//! dispatched from a server to a fleet of targets, and the lifecycle
//! state of each target.

pub mod error;
pub mod ids;
pub mod status;
pub mod target;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{TargetUrl, TaskId};
pub use status::TaskStatus;
pub use target::TargetState;
pub use task::TaskRecord;
