//! Server-side stub for one remote target.
//!
//! A `TargetProxy` wraps the outbound calls a server makes against a
//! single target, route-for-route: refresh, status, retire, and the
//! three task operations. It is stateless per call except for a local
//! retirement latch; once retired, `refresh` and `retire` short-circuit
//! without touching the network so a decommissioned node is never
//! accidentally re-engaged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use muster_core::{TargetUrl, TaskId, TaskStatus};

use crate::transport::{
    HttpTransport, Method, ProxyError, TargetTransport, TransportRequest,
};

/// Proxy for one remote target.
#[derive(Clone)]
pub struct TargetProxy {
    url: TargetUrl,
    transport: Arc<dyn TargetTransport>,
    retired: Arc<AtomicBool>,
}

impl TargetProxy {
    /// Create a proxy over an arbitrary transport (used by tests).
    pub fn new(url: TargetUrl, transport: Arc<dyn TargetTransport>) -> Self {
        Self {
            url,
            transport,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a proxy backed by HTTP with the given call timeout.
    pub fn http(url: TargetUrl, timeout: Duration) -> Self {
        let transport = Arc::new(HttpTransport::new(url.as_str(), timeout));
        Self::new(url, transport)
    }

    /// The target this proxy points at.
    pub fn url(&self) -> &TargetUrl {
        &self.url
    }

    /// Whether the proxy has latched the retired flag.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Latch the retired flag locally (no network call).
    pub fn mark_retired(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Health-check probe. Returns `Ok(true)` when the target answers
    /// 200; `Ok(false)` without a network call once retired.
    pub async fn refresh(&self) -> Result<bool, ProxyError> {
        if self.is_retired() {
            return Ok(false);
        }
        let response = self
            .transport
            .execute(TransportRequest::new(Method::Get, "/refresh"))
            .await?;
        Ok(response.is_success())
    }

    /// Fetch the target's status document.
    pub async fn get_status(&self) -> Result<Value, ProxyError> {
        let response = self
            .transport
            .execute(TransportRequest::new(Method::Get, "/status"))
            .await?;
        if !response.is_success() {
            return Err(ProxyError::Rejected {
                status: response.status,
            });
        }
        Ok(response.body)
    }

    /// Ask the target to retire itself. Latches the local flag on
    /// success; short-circuits to failure once already retired.
    pub async fn retire(&self) -> Result<(), ProxyError> {
        if self.is_retired() {
            return Err(ProxyError::Retired);
        }
        let response = self
            .transport
            .execute(TransportRequest::new(Method::Delete, "/retire"))
            .await?;
        if !response.is_success() {
            return Err(ProxyError::Rejected {
                status: response.status,
            });
        }
        self.mark_retired();
        Ok(())
    }

    /// Hand a task to the target.
    pub async fn assign_task(&self, id: &TaskId, payload: &Value) -> Result<(), ProxyError> {
        let request = TransportRequest::new(Method::Get, format!("/task/{}", id))
            .with_body(payload.clone());
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(ProxyError::Rejected {
                status: response.status,
            });
        }
        Ok(())
    }

    /// Poll the target for a task's current status.
    pub async fn task_status(&self, id: &TaskId) -> Result<TaskStatus, ProxyError> {
        let request = TransportRequest::new(Method::Post, format!("/task/{}", id));
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(ProxyError::Rejected {
                status: response.status,
            });
        }
        let status = response
            .body
            .get("status")
            .cloned()
            .ok_or_else(|| ProxyError::InvalidResponse("missing status field".into()))?;
        serde_json::from_value(status).map_err(|e| ProxyError::InvalidResponse(e.to_string()))
    }

    /// Ask the target to cancel a task.
    pub async fn cancel_task(&self, id: &TaskId) -> Result<(), ProxyError> {
        let request = TransportRequest::new(Method::Delete, format!("/task/{}", id));
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(ProxyError::Rejected {
                status: response.status,
            });
        }
        Ok(())
    }
}
