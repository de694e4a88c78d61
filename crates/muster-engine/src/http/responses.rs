//! HTTP request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Error type
// ============================================================================

/// Short machine-readable error body. Internal detail stays in the
/// local log sink.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Server-role types
// ============================================================================

/// Request body for `POST /targets`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Target base url, e.g. `http://host:6464`.
    pub url: String,

    /// Opaque registration metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// Request body for `DELETE /targets`.
#[derive(Debug, Deserialize)]
pub struct RetireRequest {
    pub url: String,

    /// Retire even with a task outstanding.
    #[serde(default)]
    pub force: bool,
}

/// Response body for `DELETE /targets`.
#[derive(Debug, Serialize)]
pub struct RetireResponse {
    pub url: String,
    /// `"retired"` or `"already_retired"`.
    pub outcome: String,
}

/// Request body for `POST /dispatch`.
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    /// Caller-supplied task id; generated when absent.
    pub id: Option<String>,

    /// Opaque payload handed to the target.
    #[serde(default)]
    pub payload: Value,
}
