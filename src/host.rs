use std::sync::Arc;

use dashmap::DashMap;
use flowdeck_plugin::{Capability, ComponentHandle, PluginCategory};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::{
    hooks::HookRegistry,
    plugin::{PluginDataStore, PluginRegistry, store::StoreError},
};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin '{0}' is not registered")]
    UnknownPlugin(String),
    #[error("plugin '{key}' declares an unusable schema: {message}")]
    InvalidSchema { key: String, message: String },
    #[error("data for plugin '{key}' does not match its schema: {}", .errors.join("; "))]
    InvalidData { key: String, errors: Vec<String> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of resolving a plugin key for rendering.
#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(ComponentHandle),
    Disabled(ComponentHandle),
    NotFound,
}

/// Enabled/disabled state per plugin key. Unknown keys are enabled.
#[derive(Debug, Default)]
pub struct PluginToggles {
    state: DashMap<String, bool>,
}

impl PluginToggles {
    pub fn is_enabled(&self, key: &str) -> bool {
        self.state.get(key).map(|v| *v).unwrap_or(true)
    }

    pub fn set(&self, key: &str, enabled: bool) {
        self.state.insert(key.to_string(), enabled);
    }

    pub fn clear(&self) {
        self.state.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub key: String,
    pub category: PluginCategory,
    pub enabled: bool,
    pub capabilities: Vec<Capability>,
}

/// Owns the plugin registry, the hook registry and the toggle overlay.
///
/// Build one per process at the composition root and hand it (or its
/// registries) to whatever renders.
#[derive(Debug)]
pub struct ExtensionHost {
    plugins: Arc<PluginRegistry>,
    hooks: Arc<HookRegistry>,
    toggles: PluginToggles,
}

impl ExtensionHost {
    pub fn new(data: PluginDataStore) -> Self {
        Self {
            plugins: Arc::new(PluginRegistry::new(data)),
            hooks: Arc::new(HookRegistry::new()),
            toggles: PluginToggles::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(PluginDataStore::in_memory())
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Registers a compiled-in component.
    pub fn register_plugin(
        &self,
        key: &str,
        component: ComponentHandle,
        category: Option<PluginCategory>,
    ) {
        self.plugins.register(key, component, category);
    }

    /// Removes the plugin, its data and every hook it owns.
    pub fn unregister_plugin(&self, key: &str) -> bool {
        let hooks = self.hooks.unregister_owner(key);
        let removed = self.plugins.unregister(key);
        if hooks > 0 {
            info!(key, hooks, "removed plugin hooks");
        }
        removed
    }

    pub fn lookup(&self, key: &str) -> Lookup {
        match self.plugins.get(key) {
            None => Lookup::NotFound,
            Some(component) if self.toggles.is_enabled(key) => Lookup::Ready(component),
            Some(component) => Lookup::Disabled(component),
        }
    }

    pub fn set_enabled(&self, key: &str, enabled: bool) {
        info!(key, enabled, "plugin toggled");
        self.toggles.set(key, enabled);
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.toggles.is_enabled(key)
    }

    /// Stores `data` for `key` after checking it against the component's
    /// schema, when it has one.
    pub fn configure_plugin(&self, key: &str, data: Value) -> Result<(), HostError> {
        let component = self
            .plugins
            .record(key)
            .ok_or_else(|| HostError::UnknownPlugin(key.to_string()))?
            .implementation;

        if let Some(schema) = component.schema() {
            let validator = jsonschema::validator_for(schema).map_err(|e| HostError::InvalidSchema {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            let errors: Vec<String> = validator.iter_errors(&data).map(|e| e.to_string()).collect();
            if !errors.is_empty() {
                return Err(HostError::InvalidData {
                    key: key.to_string(),
                    errors,
                });
            }
        }

        self.plugins.set_data(key, data)?;
        Ok(())
    }

    /// Stored data for `key`, else the component's default settings.
    pub fn plugin_data(&self, key: &str) -> Option<Value> {
        self.plugins.get_data(key).or_else(|| {
            self.plugins
                .record(key)
                .and_then(|r| r.implementation.settings().cloned())
        })
    }

    pub fn summaries(&self) -> Vec<PluginSummary> {
        self.plugins
            .list_keys()
            .into_iter()
            .filter_map(|key| {
                let record = self.plugins.record(&key)?;
                Some(PluginSummary {
                    enabled: self.toggles.is_enabled(&key),
                    category: record.category,
                    capabilities: record.implementation.capabilities(),
                    key,
                })
            })
            .collect()
    }

    /// Clears both registries and the toggle overlay.
    pub fn reset(&self) {
        self.plugins.reset();
        self.hooks.reset();
        self.toggles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_plugin::{Component, Placement, points};
    use serde_json::json;

    fn comp(name: &str) -> ComponentHandle {
        Component::from_fn(name, |_ctx| Ok(String::new())).into_handle()
    }

    #[test]
    fn test_disabled_plugin_still_resolves() {
        let host = ExtensionHost::in_memory();
        host.register_plugin("quiz", comp("quiz"), None);
        assert!(matches!(host.lookup("quiz"), Lookup::Ready(_)));

        host.set_enabled("quiz", false);
        assert!(matches!(host.lookup("quiz"), Lookup::Disabled(_)));
        assert!(host.plugins().get("quiz").is_some());
        assert!(matches!(host.lookup("nope"), Lookup::NotFound));
    }

    #[test]
    fn test_toggle_survives_reregistration() {
        let host = ExtensionHost::in_memory();
        host.register_plugin("quiz", comp("v1"), None);
        host.set_enabled("quiz", false);
        host.register_plugin("quiz", comp("v2"), None);
        assert!(!host.is_enabled("quiz"));
    }

    #[test]
    fn test_unregister_removes_hooks() {
        let host = ExtensionHost::in_memory();
        host.register_plugin("quiz", comp("quiz"), None);
        host.hooks()
            .register_hook(points::HEADER_AFTER, comp("h"), None, Placement::After, "quiz");

        assert!(host.unregister_plugin("quiz"));
        assert!(!host.hooks().has(points::HEADER_AFTER));
    }

    #[test]
    fn test_configure_validates_against_schema() {
        let host = ExtensionHost::in_memory();
        let schema = json!({
            "type": "object",
            "properties": {"threshold": {"type": "integer", "minimum": 1}},
            "required": ["threshold"]
        });
        host.register_plugin(
            "quiz",
            Component::from_fn("quiz", |_ctx| Ok(String::new()))
                .with_schema(schema)
                .with_settings(json!({"threshold": 3}))
                .into_handle(),
            None,
        );

        assert_eq!(host.plugin_data("quiz"), Some(json!({"threshold": 3})));

        let err = host.configure_plugin("quiz", json!({"threshold": 0})).unwrap_err();
        assert!(matches!(err, HostError::InvalidData { .. }));

        host.configure_plugin("quiz", json!({"threshold": 5})).unwrap();
        assert_eq!(host.plugin_data("quiz"), Some(json!({"threshold": 5})));

        assert!(matches!(
            host.configure_plugin("ghost", json!({})),
            Err(HostError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn test_failed_store_write_keeps_previous_data() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let host = ExtensionHost::new(PluginDataStore::file(blocker.join("data.json")).unwrap());
        host.register_plugin(
            "quiz",
            Component::from_fn("quiz", |_ctx| Ok(String::new()))
                .with_settings(json!({"threshold": 3}))
                .into_handle(),
            None,
        );

        let err = host.configure_plugin("quiz", json!({"threshold": 5})).unwrap_err();
        assert!(matches!(err, HostError::Store(_)));
        assert_eq!(host.plugin_data("quiz"), Some(json!({"threshold": 3})));
    }

    #[test]
    fn test_summaries_and_reset() {
        let host = ExtensionHost::in_memory();
        host.register_plugin("a", comp("a"), Some(PluginCategory::Dashboard));
        host.register_plugin("b", comp("b"), None);
        host.set_enabled("b", false);

        let summaries = host.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].category, PluginCategory::Dashboard);
        assert!(!summaries[1].enabled);
        assert_eq!(summaries[1].capabilities, vec![Capability::Render]);

        host.reset();
        assert!(host.plugins().is_empty());
        assert!(host.is_enabled("b"));
    }
}
