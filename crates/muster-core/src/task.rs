//! Task record and its state machine.

use crate::{CoreError, TargetUrl, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A TaskRecord tracks one unit of work through its lifecycle.
///
/// The payload is opaque to the core and passed through to whatever
/// executes the task. Terminal states are final: transition methods
/// refuse further mutation with `InvalidStateTransition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier.
    pub id: TaskId,

    /// Opaque JSON payload, passed through to the executor.
    pub payload: Value,

    /// Current task status.
    pub status: TaskStatus,

    /// Target this task is (or was) assigned to.
    pub assigned_to: Option<TargetUrl>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Error message if the task failed.
    pub error_message: Option<String>,
}

impl TaskRecord {
    /// Create a new pending TaskRecord.
    pub fn new(id: TaskId, payload: Value) -> Self {
        Self {
            id,
            payload,
            status: TaskStatus::Pending,
            assigned_to: None,
            created_at: Utc::now(),
            finished_at: None,
            error_message: None,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the task as assigned to a target.
    pub fn assign(&mut self, target: TargetUrl) -> Result<(), CoreError> {
        self.transition(TaskStatus::Assigned)?;
        self.assigned_to = Some(target);
        Ok(())
    }

    /// Mark the task as accepted locally (target side): enters
    /// `Assigned` without a target reference.
    pub fn accept(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Assigned)
    }

    /// Mark the task as running.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Running)
    }

    /// Mark the task as succeeded.
    pub fn succeed(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Succeeded)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Mark the task as cancelled.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Cancelled)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Fold a remotely observed status into this record.
    ///
    /// Used by the server when polling a target: the target's view is
    /// authoritative for anything it reports. Terminal records are left
    /// untouched (a stale poll result never reopens a finished task).
    pub fn observe(&mut self, status: TaskStatus) {
        if !self.is_terminal() && self.status != status {
            self.status = status;
            if status.is_terminal() {
                self.finished_at = Some(Utc::now());
            }
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
