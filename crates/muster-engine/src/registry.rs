//! Server-side target registry: the single owner of target state.
//!
//! The registry holds the ordered set of known targets and every task
//! record the server has accepted. All mutation goes through its
//! methods; per-target transitions are serialized under the registry
//! write lock, which is what guarantees at-most-one outstanding task
//! per target even under concurrent dispatch. Outbound calls are never
//! made while a lock is held.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use muster_core::{TargetState, TargetUrl, TaskId, TaskRecord};

use crate::proxy::TargetProxy;
use crate::transport::ProxyError;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No target available for assignment")]
    NoTargetAvailable,

    #[error("Target not found: {0}")]
    TargetNotFound(TargetUrl),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already exists: {0}")]
    TaskExists(TaskId),

    #[error("Invalid task record: {0}")]
    InvalidTask(String),

    #[error("Target {0} already has an outstanding task")]
    SlotOccupied(TargetUrl),

    #[error("Target {0} is retired")]
    TargetRetired(TargetUrl),

    #[error("Target {0} is not available")]
    NotAvailable(TargetUrl),

    #[error("Refusing to retire {0} with an outstanding task")]
    RetirementRejected(TargetUrl),

    #[error("Assignment to {url} failed: {source}")]
    AssignmentFailed {
        url: TargetUrl,
        source: ProxyError,
    },

    #[error(transparent)]
    Transport(#[from] ProxyError),
}

/// How a retire call concluded. Both are successes; the report differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    /// The target was retired by this call.
    Retired,
    /// The target was already retired; nothing was done.
    AlreadyRetired,
}

struct Entry {
    state: TargetState,
    proxy: TargetProxy,
}

/// The server-side collection of targets and dispatched tasks.
pub struct TargetRegistry {
    request_timeout: Duration,
    // Vec keeps registration order for FIFO selection.
    targets: RwLock<Vec<Entry>>,
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl TargetRegistry {
    /// Create an empty registry; `request_timeout` bounds every
    /// outbound call made through the proxies it creates.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            targets: RwLock::new(Vec::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a target, creating an HTTP proxy for it.
    ///
    /// Re-registering an existing url updates its metadata but does not
    /// reset retirement.
    pub async fn register(&self, url: TargetUrl, metadata: Value) -> TargetState {
        let proxy = TargetProxy::http(url.clone(), self.request_timeout);
        self.register_proxy(url, metadata, proxy).await
    }

    /// Register a target with a caller-supplied proxy (custom
    /// transports, tests).
    pub async fn register_proxy(
        &self,
        url: TargetUrl,
        metadata: Value,
        proxy: TargetProxy,
    ) -> TargetState {
        let mut targets = self.targets.write().await;
        if let Some(entry) = targets.iter_mut().find(|e| e.state.url == url) {
            entry.state.metadata = metadata;
            info!(url = %url, "Target re-registered");
            return entry.state.clone();
        }

        let state = TargetState::new(url.clone(), metadata);
        info!(url = %url, "Target registered");
        targets.push(Entry {
            state: state.clone(),
            proxy,
        });
        state
    }

    /// Current view of every registered target, in registration order.
    pub async fn list(&self) -> Vec<TargetState> {
        self.targets.read().await.iter().map(|e| e.state.clone()).collect()
    }

    /// Current view of one target.
    pub async fn get(&self, url: &TargetUrl) -> Option<TargetState> {
        self.targets
            .read()
            .await
            .iter()
            .find(|e| &e.state.url == url)
            .map(|e| e.state.clone())
    }

    /// Administrative removal. Retirement only disables a target; this
    /// deletes the entry entirely.
    pub async fn remove(&self, url: &TargetUrl) -> Result<TargetState, RegistryError> {
        let mut targets = self.targets.write().await;
        let idx = targets
            .iter()
            .position(|e| &e.state.url == url)
            .ok_or_else(|| RegistryError::TargetNotFound(url.clone()))?;
        let entry = targets.remove(idx);
        info!(url = %url, "Target removed from registry");
        Ok(entry.state)
    }

    /// Concurrently probe every non-retired target and fold the results
    /// back into availability. Fleet-wide latency is bounded by the
    /// slowest single probe, not the sum.
    pub async fn refresh_all(&self) -> HashMap<TargetUrl, bool> {
        let probes: Vec<(TargetUrl, TargetProxy)> = {
            let targets = self.targets.read().await;
            targets
                .iter()
                .filter(|e| !e.state.retired)
                .map(|e| (e.state.url.clone(), e.proxy.clone()))
                .collect()
        };

        let results = join_all(probes.into_iter().map(|(url, proxy)| async move {
            let healthy = matches!(proxy.refresh().await, Ok(true));
            (url, healthy)
        }))
        .await;

        let mut targets = self.targets.write().await;
        for (url, healthy) in &results {
            if let Some(entry) = targets.iter_mut().find(|e| &e.state.url == url) {
                entry.state.record_probe(*healthy);
                if !healthy {
                    warn!(url = %url, "Target failed health probe");
                }
            }
        }

        results.into_iter().collect()
    }

    /// Pick the first target able to take a new assignment, in
    /// registration order.
    pub async fn select_for_assignment(&self) -> Result<TargetUrl, RegistryError> {
        let targets = self.targets.read().await;
        targets
            .iter()
            .find(|e| e.state.can_accept())
            .map(|e| e.state.url.clone())
            .ok_or(RegistryError::NoTargetAvailable)
    }

    /// Assign a task to a specific target.
    ///
    /// The slot is occupied under the write lock before any network
    /// I/O; a transport failure rolls the mark back so the slot is
    /// never silently stuck.
    pub async fn assign(
        &self,
        url: &TargetUrl,
        mut task: TaskRecord,
    ) -> Result<TaskRecord, RegistryError> {
        // Validate the record before touching any slot.
        task.assign(url.clone())
            .map_err(|e| RegistryError::InvalidTask(e.to_string()))?;
        {
            let tasks = self.tasks.read().await;
            if tasks.contains_key(&task.id) {
                return Err(RegistryError::TaskExists(task.id));
            }
        }

        // Occupy the slot atomically with the eligibility check.
        let proxy = {
            let mut targets = self.targets.write().await;
            let entry = targets
                .iter_mut()
                .find(|e| &e.state.url == url)
                .ok_or_else(|| RegistryError::TargetNotFound(url.clone()))?;

            if entry.state.retired {
                return Err(RegistryError::TargetRetired(url.clone()));
            }
            if entry.state.is_busy() {
                return Err(RegistryError::SlotOccupied(url.clone()));
            }
            if !entry.state.available {
                return Err(RegistryError::NotAvailable(url.clone()));
            }

            entry.state.occupy(task.id.clone());
            entry.proxy.clone()
        };

        {
            let mut tasks = self.tasks.write().await;
            if tasks.contains_key(&task.id) {
                // Lost a race to a duplicate id; roll the slot back.
                drop(tasks);
                self.release_slot(url).await;
                return Err(RegistryError::TaskExists(task.id));
            }
            tasks.insert(task.id.clone(), task.clone());
        }

        info!(task_id = %task.id, url = %url, "Assigning task to target");

        if let Err(e) = proxy.assign_task(&task.id, &task.payload).await {
            warn!(task_id = %task.id, url = %url, error = %e, "Assignment failed, rolling back slot");
            {
                let mut targets = self.targets.write().await;
                if let Some(entry) = targets.iter_mut().find(|e| &e.state.url == url) {
                    entry.state.release();
                    if matches!(e, ProxyError::Unreachable(_)) {
                        entry.state.record_probe(false);
                    }
                }
            }
            {
                let mut tasks = self.tasks.write().await;
                if let Some(record) = tasks.get_mut(&task.id) {
                    let _ = record.fail(e.to_string());
                }
            }
            return Err(RegistryError::AssignmentFailed {
                url: url.clone(),
                source: e,
            });
        }

        Ok(task)
    }

    /// Accept a task and dispatch it to the first available target.
    pub async fn dispatch(&self, task: TaskRecord) -> Result<TaskRecord, RegistryError> {
        let url = self.select_for_assignment().await?;
        self.assign(&url, task).await
    }

    /// Retire a target, refusing while a task is outstanding unless
    /// forced. Calling retire twice reports `AlreadyRetired` the second
    /// time; that is a success, not an error.
    pub async fn retire(
        &self,
        url: &TargetUrl,
        force: bool,
    ) -> Result<RetireOutcome, RegistryError> {
        // Take the target out of the assignment pool before the
        // network call so a concurrent dispatch cannot occupy the slot
        // mid-retirement.
        let (proxy, was_available) = {
            let mut targets = self.targets.write().await;
            let entry = targets
                .iter_mut()
                .find(|e| &e.state.url == url)
                .ok_or_else(|| RegistryError::TargetNotFound(url.clone()))?;

            if entry.state.retired {
                return Ok(RetireOutcome::AlreadyRetired);
            }
            if entry.state.is_busy() && !force {
                return Err(RegistryError::RetirementRejected(url.clone()));
            }
            let was_available = entry.state.available;
            entry.state.available = false;
            (entry.proxy.clone(), was_available)
        };

        match proxy.retire().await {
            Ok(()) => {}
            // The proxy latched retirement between our check and the
            // call; a concurrent retire won the race.
            Err(ProxyError::Retired) => {
                self.mark_retired(url).await;
                return Ok(RetireOutcome::AlreadyRetired);
            }
            Err(ProxyError::Rejected { .. }) => {
                self.restore_availability(url, was_available).await;
                return Err(RegistryError::RetirementRejected(url.clone()));
            }
            Err(e) => {
                self.restore_availability(url, was_available).await;
                return Err(RegistryError::Transport(e));
            }
        }

        self.mark_retired(url).await;
        info!(url = %url, forced = force, "Target retired");
        Ok(RetireOutcome::Retired)
    }

    /// Current record for one task.
    pub async fn task(&self, id: &TaskId) -> Option<TaskRecord> {
        self.tasks.read().await.get(id).cloned()
    }

    /// All task records.
    pub async fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Cancel a dispatched task through its target's proxy.
    ///
    /// Cancelling an already-terminal task returns the record unchanged;
    /// that race is benign.
    pub async fn cancel(&self, id: &TaskId) -> Result<TaskRecord, RegistryError> {
        let (url, proxy) = {
            let tasks = self.tasks.read().await;
            let record = tasks
                .get(id)
                .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))?;
            if record.is_terminal() {
                return Ok(record.clone());
            }
            let url = record
                .assigned_to
                .clone()
                .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))?;
            drop(tasks);

            let targets = self.targets.read().await;
            let proxy = targets
                .iter()
                .find(|e| e.state.url == url)
                .map(|e| e.proxy.clone())
                .ok_or_else(|| RegistryError::TargetNotFound(url.clone()))?;
            (url, proxy)
        };

        match proxy.cancel_task(id).await {
            // 404 means the target already dropped the task; treat the
            // cancellation as effective either way.
            Ok(()) | Err(ProxyError::Rejected { .. }) => {}
            Err(e) => return Err(RegistryError::Transport(e)),
        }

        let record = {
            let mut tasks = self.tasks.write().await;
            let record = tasks
                .get_mut(id)
                .ok_or_else(|| RegistryError::TaskNotFound(id.clone()))?;
            if !record.is_terminal() {
                let _ = record.cancel();
            }
            record.clone()
        };
        self.release_slot(&url).await;

        info!(task_id = %id, url = %url, "Task cancelled");
        Ok(record)
    }

    /// Poll every outstanding task for its current status and fold
    /// terminal results back into the records, freeing slots.
    pub async fn poll_outstanding(&self) {
        let outstanding: Vec<(TargetUrl, TaskId, TargetProxy)> = {
            let targets = self.targets.read().await;
            targets
                .iter()
                .filter_map(|e| {
                    e.state
                        .active_task
                        .clone()
                        .map(|id| (e.state.url.clone(), id, e.proxy.clone()))
                })
                .collect()
        };

        let polls = join_all(outstanding.into_iter().map(|(url, id, proxy)| async move {
            let result = proxy.task_status(&id).await;
            (url, id, result)
        }))
        .await;

        for (url, id, result) in polls {
            match result {
                Ok(status) => {
                    let finished = {
                        let mut tasks = self.tasks.write().await;
                        if let Some(record) = tasks.get_mut(&id) {
                            record.observe(status);
                            record.is_terminal()
                        } else {
                            false
                        }
                    };
                    if finished {
                        info!(task_id = %id, url = %url, status = %status, "Task reached terminal state");
                        self.release_slot(&url).await;
                    }
                }
                Err(ProxyError::Rejected { status: 404 }) => {
                    // The target no longer tracks the task; fail it
                    // rather than leave the slot stuck.
                    warn!(task_id = %id, url = %url, "Target lost track of task");
                    {
                        let mut tasks = self.tasks.write().await;
                        if let Some(record) = tasks.get_mut(&id) {
                            let _ = record.fail("target no longer tracks this task");
                        }
                    }
                    self.release_slot(&url).await;
                }
                Err(ProxyError::Unreachable(e)) => {
                    warn!(task_id = %id, url = %url, error = %e, "Target unreachable while polling task");
                    let mut targets = self.targets.write().await;
                    if let Some(entry) = targets.iter_mut().find(|t| t.state.url == url) {
                        entry.state.record_probe(false);
                    }
                }
                Err(e) => {
                    warn!(task_id = %id, url = %url, error = %e, "Task status poll failed");
                }
            }
        }
    }

    async fn restore_availability(&self, url: &TargetUrl, available: bool) {
        let mut targets = self.targets.write().await;
        if let Some(entry) = targets.iter_mut().find(|e| &e.state.url == url) {
            if !entry.state.retired {
                entry.state.available = available;
            }
        }
    }

    async fn mark_retired(&self, url: &TargetUrl) {
        let mut targets = self.targets.write().await;
        if let Some(entry) = targets.iter_mut().find(|e| &e.state.url == url) {
            entry.state.retire();
            entry.proxy.mark_retired();
        }
    }

    async fn release_slot(&self, url: &TargetUrl) {
        let mut targets = self.targets.write().await;
        if let Some(entry) = targets.iter_mut().find(|e| &e.state.url == url) {
            entry.state.release();
        }
    }
}
