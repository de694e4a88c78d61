//! Engine configuration: the JSON document, immutable snapshots, and
//! the atomic-swap handle.
//!
//! The configuration document is the only durable state the engine
//! relies on. Snapshots are immutable; a reload or replace validates a
//! whole new document and swaps it in, so concurrent readers never see
//! a torn or half-valid configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use muster_core::TargetUrl;

/// Default control-plane port for the server role.
pub const SERVER_PORT: u16 = 6565;

/// Default control-plane port for the target role.
pub const TARGET_PORT: u16 = 6464;

/// Default interval between fleet refresh ticks.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15;

/// Default timeout for outbound calls to a target.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Which half of the engine a process runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds the target registry and dispatches tasks.
    #[default]
    Server,
    /// Accepts and executes tasks.
    Target,
}

impl Role {
    /// The fixed default port for this role.
    pub fn default_port(&self) -> u16 {
        match self {
            Role::Server => SERVER_PORT,
            Role::Target => TARGET_PORT,
        }
    }

    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "target" => Ok(Role::Target),
            other => Err(ConfigError::InvalidRole(other.to_owned())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config document must be a JSON object")]
    NotAnObject,

    #[error("Unknown role: {0}")]
    InvalidRole(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: String, value: String },
}

/// An immutable, validated configuration snapshot.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Role this process runs as.
    pub role: Role,

    /// Port the control-plane listener binds to.
    pub port: u16,

    /// Interval between fleet refresh ticks (server role).
    pub refresh_interval: Duration,

    /// Timeout for each outbound call to a target.
    pub request_timeout: Duration,

    doc: Value,
}

impl EngineConfig {
    /// Validate a raw JSON document into a snapshot.
    ///
    /// Absent fields fall back to defaults; a present-but-invalid field
    /// rejects the whole document.
    pub fn from_value(doc: Value) -> Result<Self, ConfigError> {
        let obj = doc.as_object().ok_or(ConfigError::NotAnObject)?;

        let role = match obj.get("role") {
            Some(Value::String(s)) if !s.is_empty() => Role::parse(s)?,
            Some(Value::Null) | None => Role::default(),
            Some(other) => return Err(ConfigError::InvalidRole(other.to_string())),
        };

        let port = match obj.get("port") {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| ConfigError::InvalidPort(n.to_string()))?,
            // The original on-disk format stored the port as a string.
            Some(Value::String(s)) if !s.is_empty() => s
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(s.clone()))?,
            Some(Value::Null) | None | Some(Value::String(_)) => role.default_port(),
            Some(other) => return Err(ConfigError::InvalidPort(other.to_string())),
        };

        let refresh_interval = duration_field(obj, "refresh_interval_secs")?
            .unwrap_or(Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS));
        let request_timeout = duration_field(obj, "request_timeout_secs")?
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        Ok(Self {
            role,
            port,
            refresh_interval,
            request_timeout,
            doc,
        })
    }

    /// The raw configuration document.
    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// Environment map injected into spawned work processes (target
    /// role). Absent means empty.
    pub fn environment(&self) -> HashMap<String, String> {
        match self.doc.get("environment") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                .collect(),
            _ => HashMap::new(),
        }
    }

    /// Per-plugin settings objects. Absent means empty.
    pub fn plugins(&self) -> HashMap<String, Value> {
        match self.doc.get("plugins") {
            Some(Value::Object(map)) => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            _ => HashMap::new(),
        }
    }

    /// Targets to pre-register at startup (server role).
    pub fn targets(&self) -> Vec<TargetUrl> {
        match self.doc.get("targets") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(TargetUrl::new))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        // An empty object always validates.
        Self::from_value(json!({})).unwrap()
    }
}

fn duration_field(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    match obj.get(key) {
        Some(Value::Number(n)) => {
            let secs = n.as_u64().ok_or_else(|| ConfigError::InvalidField {
                field: key.to_owned(),
                value: n.to_string(),
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        _ => Ok(None),
    }
}

/// Shared handle to the current configuration snapshot.
///
/// Readers take `snapshot()` (a cheap Arc clone); writers validate a
/// new document, persist it, and swap the Arc. A failed validation
/// leaves the previous snapshot active and the file on disk untouched.
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<EngineConfig>>,
}

impl ConfigHandle {
    /// Load configuration from an optional file path.
    ///
    /// A missing file is not an error: the handle starts from defaults
    /// and still persists to the path on replace.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match &path {
            Some(p) if p.exists() => {
                let data = std::fs::read_to_string(p)?;
                let doc: Value = serde_json::from_str(&data)?;
                let config = EngineConfig::from_value(doc)?;
                info!(path = %p.display(), role = %config.role, port = config.port, "Loaded configuration");
                config
            }
            Some(p) => {
                warn!(path = %p.display(), "Config file not found, using defaults");
                EngineConfig::default()
            }
            None => EngineConfig::default(),
        };

        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Create a handle around an already-built snapshot, with no
    /// backing file.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The backing file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.current.read().unwrap().clone()
    }

    /// Validate, persist, and swap in a new document.
    ///
    /// Without a backing path the swap is in-memory only.
    pub fn replace(&self, doc: Value) -> Result<(), ConfigError> {
        let config = EngineConfig::from_value(doc)?;

        if let Some(path) = &self.path {
            let data = serde_json::to_string_pretty(config.document())?;
            std::fs::write(path, data)?;
        }

        let mut current = self.current.write().unwrap();
        *current = Arc::new(config);
        Ok(())
    }

    /// Swap in a modified document without touching the backing file.
    /// Used for command-line overrides, which must not persist.
    pub fn override_with(&self, mutate: impl FnOnce(&mut Value)) -> Result<(), ConfigError> {
        let mut doc = self.snapshot().document().clone();
        mutate(&mut doc);
        let config = EngineConfig::from_value(doc)?;

        let mut current = self.current.write().unwrap();
        *current = Arc::new(config);
        Ok(())
    }

    /// Re-read the backing file and swap in the result.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = std::fs::read_to_string(path)?;
        let doc: Value = serde_json::from_str(&data)?;
        let config = EngineConfig::from_value(doc)?;

        let mut current = self.current.write().unwrap();
        *current = Arc::new(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("muster-config-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.port, SERVER_PORT);
    }

    #[test]
    fn test_role_sets_default_port() {
        let config = EngineConfig::from_value(json!({"role": "target"})).unwrap();
        assert_eq!(config.role, Role::Target);
        assert_eq!(config.port, TARGET_PORT);
    }

    #[test]
    fn test_explicit_port_wins() {
        let config =
            EngineConfig::from_value(json!({"role": "target", "port": 9000})).unwrap();
        assert_eq!(config.port, 9000);

        // Legacy string form.
        let config =
            EngineConfig::from_value(json!({"role": "server", "port": "9001"})).unwrap();
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn test_invalid_role_rejected() {
        let err = EngineConfig::from_value(json!({"role": "mediator"})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRole(_)));
    }

    #[test]
    fn test_absent_maps_are_empty() {
        let config = EngineConfig::default();
        assert!(config.environment().is_empty());
        assert!(config.plugins().is_empty());
        assert!(config.targets().is_empty());
    }

    #[test]
    fn test_environment_and_targets() {
        let config = EngineConfig::from_value(json!({
            "environment": {"PATH_EXTRA": "/opt/bin"},
            "targets": ["http://a:6464/", "http://b:6464"]
        }))
        .unwrap();
        assert_eq!(
            config.environment().get("PATH_EXTRA"),
            Some(&"/opt/bin".to_string())
        );
        assert_eq!(
            config.targets(),
            vec![TargetUrl::new("http://a:6464"), TargetUrl::new("http://b:6464")]
        );
    }

    #[test]
    fn test_replace_round_trip() {
        let path = temp_path();
        let handle = ConfigHandle::load(Some(path.clone())).unwrap();

        let doc = json!({"role": "target", "port": 7000});
        handle.replace(doc.clone()).unwrap();
        assert_eq!(handle.snapshot().document(), &doc);

        // Persisted: a fresh load sees the same document.
        let reloaded = ConfigHandle::load(Some(path.clone())).unwrap();
        assert_eq!(reloaded.snapshot().document(), &doc);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_replace_invalid_keeps_previous() {
        let handle = ConfigHandle::in_memory(EngineConfig::default());
        let before = handle.snapshot().document().clone();

        assert!(handle.replace(json!(["not", "an", "object"])).is_err());
        assert!(handle.replace(json!({"role": "mediator"})).is_err());
        assert!(handle.replace(json!({"port": "not-a-port"})).is_err());

        assert_eq!(handle.snapshot().document(), &before);
    }
}
