//! Plugin registry boundary.
//!
//! Plugins contribute route fragments that are merged into the control
//! surface at startup. The engine never scans the filesystem for them;
//! the embedding binary hands over an explicit list.

use std::collections::HashMap;

use axum::Router;
use serde_json::Value;
use tracing::info;

/// A route-contributing plugin.
pub trait Plugin: Send + Sync {
    /// Unique plugin name; keys into the `plugins` section of the
    /// configuration document.
    fn name(&self) -> &str;

    /// Router fragment to merge into the control surface. `settings`
    /// is this plugin's configuration object (`Null` when absent).
    fn router(&self, settings: Value) -> Router;
}

/// Merge every plugin's routes into the root router.
pub fn merge_plugin_routes(
    mut root: Router,
    plugins: &[Box<dyn Plugin>],
    settings: &HashMap<String, Value>,
) -> Router {
    for plugin in plugins {
        let plugin_settings = settings
            .get(plugin.name())
            .cloned()
            .unwrap_or(Value::Null);
        info!(plugin = plugin.name(), "Merging plugin routes");
        root = root.merge(plugin.router(plugin_settings));
    }
    root
}
