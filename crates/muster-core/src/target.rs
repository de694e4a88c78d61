//! Target state: availability, retirement, and the single task slot.

use crate::{TargetUrl, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-side view of one target's lifecycle state.
///
/// Invariant: `retired == true` implies `available == false`, and
/// retirement is permanent. All mutation goes through the methods below;
/// they are the only writers that keep the invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// Network address, unique per registry.
    pub url: TargetUrl,

    /// Whether the target can be considered for new assignments.
    pub available: bool,

    /// Terminal flag; once true, never false again.
    pub retired: bool,

    /// Task currently occupying this target's single slot.
    pub active_task: Option<TaskId>,

    /// Opaque registration metadata.
    pub metadata: Value,

    /// When the target was registered.
    pub registered_at: DateTime<Utc>,

    /// When the target last answered a probe.
    pub last_seen: Option<DateTime<Utc>>,
}

impl TargetState {
    /// Create a new target in the registered state.
    pub fn new(url: TargetUrl, metadata: Value) -> Self {
        Self {
            url,
            available: true,
            retired: false,
            active_task: None,
            metadata,
            registered_at: Utc::now(),
            last_seen: None,
        }
    }

    /// True if this target can take a new assignment right now.
    pub fn can_accept(&self) -> bool {
        self.available && !self.retired && self.active_task.is_none()
    }

    /// True if a task occupies the slot.
    pub fn is_busy(&self) -> bool {
        self.active_task.is_some()
    }

    /// Apply the result of a health probe.
    ///
    /// A failed probe marks the target unavailable without retiring it.
    /// A successful probe restores availability only while the slot is
    /// free; a busy target stays out of the assignment pool.
    pub fn record_probe(&mut self, healthy: bool) {
        if self.retired {
            return;
        }
        if healthy {
            self.last_seen = Some(Utc::now());
            self.available = self.active_task.is_none();
        } else {
            self.available = false;
        }
    }

    /// Occupy the slot for a task. Caller must have checked `can_accept`.
    pub fn occupy(&mut self, task_id: TaskId) {
        self.active_task = Some(task_id);
        self.available = false;
    }

    /// Free the slot, restoring availability unless retired.
    pub fn release(&mut self) {
        self.active_task = None;
        if !self.retired {
            self.available = true;
        }
    }

    /// Permanently retire this target.
    pub fn retire(&mut self) {
        self.retired = true;
        self.available = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> TargetState {
        TargetState::new(TargetUrl::new("http://host:6464"), json!({}))
    }

    #[test]
    fn test_new_target_accepts() {
        assert!(target().can_accept());
    }

    #[test]
    fn test_failed_probe_is_transient() {
        let mut t = target();
        t.record_probe(false);
        assert!(!t.available);
        assert!(!t.retired);

        t.record_probe(true);
        assert!(t.available);
    }

    #[test]
    fn test_probe_does_not_free_busy_target() {
        let mut t = target();
        t.occupy(TaskId::new("t1"));
        t.record_probe(true);
        assert!(!t.available);
        assert!(!t.can_accept());

        t.release();
        assert!(t.can_accept());
    }

    #[test]
    fn test_retirement_is_permanent() {
        let mut t = target();
        t.retire();
        assert!(t.retired);
        assert!(!t.available);

        // Neither a probe nor a slot release reinstates a retired target.
        t.record_probe(true);
        assert!(!t.available);
        t.release();
        assert!(!t.available);
        assert!(!t.can_accept());
    }
}
