//! Target-side task execution surface.
//!
//! A target has a single task slot. `accept` stores the record and
//! spawns execution through the `TaskRunner` seam under a cancellation
//! token; completion or cancellation frees the slot while the record
//! stays behind for later status polls.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use muster_core::{TaskId, TaskRecord};

/// Errors from the local execution surface.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("A task is already occupying the slot")]
    Busy,

    #[error("Target is retired")]
    Retired,

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already known: {0}")]
    Duplicate(TaskId),
}

/// How a cancel call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was signalled and the slot freed.
    Cancelled,
    /// The task had already reached a terminal state. Benign race.
    AlreadyTerminal,
}

/// Runs one task payload to completion, honoring cooperative
/// cancellation.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Execute the payload. `Err` carries a failure message.
    async fn run(
        &self,
        id: &TaskId,
        payload: &Value,
        cancel: CancellationToken,
    ) -> Result<(), String>;
}

/// Default runner: spawns `payload.command` with `payload.args` as a
/// child process, injecting the configured environment map.
pub struct CommandRunner {
    environment: HashMap<String, String>,
}

impl CommandRunner {
    pub fn new(environment: HashMap<String, String>) -> Self {
        Self { environment }
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn run(
        &self,
        id: &TaskId,
        payload: &Value,
        cancel: CancellationToken,
    ) -> Result<(), String> {
        let command = payload
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload has no command field".to_string())?;
        let args: Vec<String> = match payload.get("args") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        };

        info!(task_id = %id, command = %command, "Spawning task process");

        let mut child = tokio::process::Command::new(command)
            .args(&args)
            .envs(&self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", command, e))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| e.to_string())?;
                if status.success() {
                    Ok(())
                } else {
                    Err(format!("process exited with {}", status))
                }
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err("cancelled".to_string())
            }
        }
    }
}

struct ExecState {
    tasks: HashMap<TaskId, TaskRecord>,
    active: Option<(TaskId, CancellationToken)>,
}

/// The local single-slot execution surface of a target.
pub struct TaskExecutor {
    runner: Arc<dyn TaskRunner>,
    retired: AtomicBool,
    state: Arc<Mutex<ExecState>>,
}

impl TaskExecutor {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            runner,
            retired: AtomicBool::new(false),
            state: Arc::new(Mutex::new(ExecState {
                tasks: HashMap::new(),
                active: None,
            })),
        }
    }

    /// Whether this target has retired itself.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Whether a task currently occupies the slot.
    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().active.is_some()
    }

    /// Accept a task into the slot and begin executing it.
    pub fn accept(&self, id: TaskId, payload: Value) -> Result<TaskRecord, ExecutorError> {
        if self.is_retired() {
            return Err(ExecutorError::Retired);
        }

        let (record, cancel) = {
            let mut state = self.state.lock().unwrap();
            if state.active.is_some() {
                return Err(ExecutorError::Busy);
            }
            if state.tasks.contains_key(&id) {
                return Err(ExecutorError::Duplicate(id));
            }

            let mut record = TaskRecord::new(id.clone(), payload);
            // New records always accept cleanly.
            record.accept().ok();

            let cancel = CancellationToken::new();
            state.active = Some((id.clone(), cancel.clone()));
            state.tasks.insert(id.clone(), record.clone());
            (record, cancel)
        };

        info!(task_id = %record.id, "Task accepted");

        let runner = self.runner.clone();
        let state = self.state.clone();
        let payload = record.payload.clone();
        let task_id = record.id.clone();
        tokio::spawn(async move {
            {
                let mut state = state.lock().unwrap();
                if let Some(r) = state.tasks.get_mut(&task_id) {
                    let _ = r.start();
                }
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                res = runner.run(&task_id, &payload, cancel.clone()) => Some(res),
            };

            let mut state = state.lock().unwrap();
            if let Some(r) = state.tasks.get_mut(&task_id) {
                // cancel() may already have finalized the record.
                if !r.is_terminal() {
                    let outcome = match result {
                        Some(Ok(())) => r.succeed(),
                        Some(Err(e)) => {
                            warn!(task_id = %task_id, error = %e, "Task failed");
                            r.fail(e)
                        }
                        None => r.cancel(),
                    };
                    outcome.ok();
                }
            }
            if state
                .active
                .as_ref()
                .map(|(active_id, _)| active_id == &task_id)
                .unwrap_or(false)
            {
                state.active = None;
            }
        });

        Ok(record)
    }

    /// Current record for a task, completed ones included.
    pub fn status(&self, id: &TaskId) -> Option<TaskRecord> {
        self.state.lock().unwrap().tasks.get(id).cloned()
    }

    /// Cooperatively cancel a task and free the slot.
    pub fn cancel(&self, id: &TaskId) -> Result<CancelOutcome, ExecutorError> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .tasks
            .get(id)
            .ok_or_else(|| ExecutorError::NotFound(id.clone()))?;
        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        if let Some((active_id, cancel)) = &state.active {
            if active_id == id {
                cancel.cancel();
            }
        }
        if let Some(record) = state.tasks.get_mut(id) {
            let _ = record.cancel();
        }
        if state
            .active
            .as_ref()
            .map(|(active_id, _)| active_id == id)
            .unwrap_or(false)
        {
            state.active = None;
        }

        info!(task_id = %id, "Task cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Retire this target. Refuses while a task is outstanding;
    /// repeating the call once retired is a no-op success.
    pub fn retire(&self) -> Result<(), ExecutorError> {
        if self.is_retired() {
            return Ok(());
        }
        if self.is_busy() {
            return Err(ExecutorError::Busy);
        }
        self.retired.store(true, Ordering::SeqCst);
        info!("Target retired");
        Ok(())
    }

    /// Status document served on `GET /status`.
    pub fn status_document(&self) -> Value {
        let state = self.state.lock().unwrap();
        let tasks: serde_json::Map<String, Value> = state
            .tasks
            .iter()
            .map(|(id, record)| (id.to_string(), json!(record.status)))
            .collect();
        json!({
            "role": "target",
            "retired": self.is_retired(),
            "busy": state.active.is_some(),
            "active_task": state.active.as_ref().map(|(id, _)| id.to_string()),
            "tasks": tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::TaskStatus;
    use std::time::Duration;

    /// Runner that blocks until cancelled.
    struct HangingRunner;

    #[async_trait]
    impl TaskRunner for HangingRunner {
        async fn run(
            &self,
            _id: &TaskId,
            _payload: &Value,
            cancel: CancellationToken,
        ) -> Result<(), String> {
            cancel.cancelled().await;
            Err("cancelled".to_string())
        }
    }

    /// Runner that completes immediately.
    struct InstantRunner {
        result: Result<(), String>,
    }

    #[async_trait]
    impl TaskRunner for InstantRunner {
        async fn run(
            &self,
            _id: &TaskId,
            _payload: &Value,
            _cancel: CancellationToken,
        ) -> Result<(), String> {
            self.result.clone()
        }
    }

    async fn wait_terminal(executor: &TaskExecutor, id: &TaskId) -> TaskStatus {
        for _ in 0..100 {
            if let Some(record) = executor.status(id) {
                if record.is_terminal() {
                    return record.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_busy_slot_rejects_second_task() {
        let executor = TaskExecutor::new(Arc::new(HangingRunner));
        executor.accept(TaskId::new("t0"), json!({})).unwrap();

        let err = executor.accept(TaskId::new("t1"), json!({})).unwrap_err();
        assert!(matches!(err, ExecutorError::Busy));

        // Cancelling t0 frees the slot for t1.
        assert_eq!(
            executor.cancel(&TaskId::new("t0")).unwrap(),
            CancelOutcome::Cancelled
        );
        executor.accept(TaskId::new("t1"), json!({})).unwrap();
    }

    #[tokio::test]
    async fn test_completion_frees_slot() {
        let executor = TaskExecutor::new(Arc::new(InstantRunner { result: Ok(()) }));
        executor.accept(TaskId::new("t0"), json!({})).unwrap();

        assert_eq!(wait_terminal(&executor, &TaskId::new("t0")).await, TaskStatus::Succeeded);
        assert!(!executor.is_busy());

        // The record survives completion for later polls.
        assert!(executor.status(&TaskId::new("t0")).is_some());
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let executor = TaskExecutor::new(Arc::new(InstantRunner {
            result: Err("boom".to_string()),
        }));
        executor.accept(TaskId::new("t0"), json!({})).unwrap();

        assert_eq!(wait_terminal(&executor, &TaskId::new("t0")).await, TaskStatus::Failed);
        let record = executor.status(&TaskId::new("t0")).unwrap();
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_retired_rejects_new_tasks() {
        let executor = TaskExecutor::new(Arc::new(HangingRunner));
        executor.retire().unwrap();

        let err = executor.accept(TaskId::new("t0"), json!({})).unwrap_err();
        assert!(matches!(err, ExecutorError::Retired));

        // Retire again: idempotent no-op.
        executor.retire().unwrap();
    }

    #[tokio::test]
    async fn test_retire_refused_while_busy() {
        let executor = TaskExecutor::new(Arc::new(HangingRunner));
        executor.accept(TaskId::new("t0"), json!({})).unwrap();

        let err = executor.retire().unwrap_err();
        assert!(matches!(err, ExecutorError::Busy));
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_terminal() {
        let executor = TaskExecutor::new(Arc::new(InstantRunner { result: Ok(()) }));

        let err = executor.cancel(&TaskId::new("missing")).unwrap_err();
        assert!(matches!(err, ExecutorError::NotFound(_)));

        executor.accept(TaskId::new("t0"), json!({})).unwrap();
        wait_terminal(&executor, &TaskId::new("t0")).await;
        assert_eq!(
            executor.cancel(&TaskId::new("t0")).unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_injects_environment() {
        let mut environment = HashMap::new();
        environment.insert("MUSTER_TEST".to_string(), "ok".to_string());
        let executor = TaskExecutor::new(Arc::new(CommandRunner::new(environment)));

        executor
            .accept(
                TaskId::new("t0"),
                json!({"command": "sh", "args": ["-c", "[ \"$MUSTER_TEST\" = ok ]"]}),
            )
            .unwrap();
        assert_eq!(wait_terminal(&executor, &TaskId::new("t0")).await, TaskStatus::Succeeded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_reports_exit_failure() {
        let executor = TaskExecutor::new(Arc::new(CommandRunner::new(HashMap::new())));
        executor
            .accept(TaskId::new("t0"), json!({"command": "false"}))
            .unwrap();
        assert_eq!(wait_terminal(&executor, &TaskId::new("t0")).await, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_command_runner_rejects_missing_command() {
        let executor = TaskExecutor::new(Arc::new(CommandRunner::new(HashMap::new())));
        executor.accept(TaskId::new("t0"), json!({})).unwrap();
        assert_eq!(wait_terminal(&executor, &TaskId::new("t0")).await, TaskStatus::Failed);
    }
}
