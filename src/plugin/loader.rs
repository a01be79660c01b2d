use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use flowdeck_plugin::{DEFAULT_PRIORITY, HookRegistration};
use tracing::{info, warn};

use super::{manifest::ModuleImporter, registry::PluginRegistry};
use crate::{hooks::HookRegistry, logger::EVENT_TARGET};

/// Plugin key for a module location: the last path segment without its
/// extension, e.g. `plugins/quiz.yaml` -> `quiz`.
pub fn derive_key(location: &Path) -> Option<String> {
    location
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Discovers modules in one directory and registers what they export.
#[derive(Clone)]
pub struct PluginLoader {
    plugins: Arc<PluginRegistry>,
    hooks: Arc<HookRegistry>,
    importer: Arc<dyn ModuleImporter>,
    dir: PathBuf,
}

impl PluginLoader {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        hooks: Arc<HookRegistry>,
        importer: Arc<dyn ModuleImporter>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plugins,
            hooks,
            importer,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn importer(&self) -> &Arc<dyn ModuleImporter> {
        &self.importer
    }

    /// Loads every module in the plugin directory, in file-name order.
    /// Modules that fail are logged and skipped. Returns the registered keys.
    pub async fn discover_and_load(&self) -> Vec<String> {
        let modules = match self.list_modules().await {
            Ok(modules) => modules,
            Err(e) => {
                warn!(dir = %self.dir.display(), %e, "cannot read plugin directory");
                return Vec::new();
            }
        };

        let mut keys = Vec::new();
        for path in modules {
            if let Some(key) = self.load_one(&path).await {
                keys.push(key);
            }
        }
        info!(dir = %self.dir.display(), loaded = keys.len(), "plugin discovery finished");
        keys
    }

    async fn list_modules(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut modules = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && self.importer.accepts(&path) {
                modules.push(path);
            }
        }
        modules.sort();
        Ok(modules)
    }

    /// Imports a single module and registers its default export and hooks.
    /// Returns the derived key, or `None` on any failure.
    pub async fn load_one(&self, location: impl AsRef<Path>) -> Option<String> {
        let location = location.as_ref();
        let Some(key) = derive_key(location) else {
            warn!(?location, "cannot derive a plugin key");
            return None;
        };

        let module = match self.importer.import(location).await {
            Ok(module) => module,
            Err(e) => {
                warn!(key, %e, "failed to import plugin module");
                return None;
            }
        };
        let Some(component) = module.default_export else {
            warn!(key, ?location, "plugin module has no default export");
            return None;
        };

        self.plugins.register(&key, component, module.category);

        // a reload replaces the owner's whole hook set
        self.hooks.unregister_owner(&key);
        let hook_count = module.hooks.len();
        for hook in module.hooks {
            self.hooks.register(
                HookRegistration::new(hook.point, key.as_str(), hook.placement, hook.component)
                    .with_priority(hook.priority.unwrap_or(DEFAULT_PRIORITY)),
            );
        }

        info!(target: EVENT_TARGET, plugin = %key, hooks = hook_count, "plugin loaded");
        Some(key)
    }

    /// Drops whatever was loaded from `location`.
    pub fn unload(&self, location: &Path) -> Option<String> {
        let key = derive_key(location)?;
        let hooks = self.hooks.unregister_owner(&key);
        let removed = self.plugins.unregister(&key);
        if removed || hooks > 0 {
            info!(target: EVENT_TARGET, plugin = %key, hooks, "plugin unloaded");
        }
        Some(key)
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::ManifestImporter;
    use flowdeck_plugin::{PluginCategory, points};
    use serde_json::json;
    use tempfile::TempDir;

    fn loader(dir: &Path) -> PluginLoader {
        PluginLoader::new(
            Arc::new(PluginRegistry::in_memory()),
            Arc::new(HookRegistry::new()),
            Arc::new(ManifestImporter::default()),
            dir,
        )
    }

    #[test]
    fn test_derive_key() {
        assert_eq!(derive_key(Path::new("plugins/quiz.yaml")).as_deref(), Some("quiz"));
        assert_eq!(derive_key(Path::new("/abs/dir/score.board.json")).as_deref(), Some("score.board"));
        assert_eq!(derive_key(Path::new("bare")).as_deref(), Some("bare"));
        assert_eq!(derive_key(Path::new("/")), None);
    }

    #[tokio::test]
    async fn test_discover_skips_broken_modules() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("a_quiz.yaml"), "default:\n  render:\n    text: quiz\n").unwrap();
        std::fs::write(
            dir.join("b_stats.json"),
            r#"{"default": {"category": "dashboard", "render": {"text": "stats"}}}"#,
        )
        .unwrap();
        // no default export
        std::fs::write(dir.join("c_hooks_only.yaml"), "hooks: []\n").unwrap();
        std::fs::write(dir.join("d_broken.json"), "{").unwrap();
        std::fs::write(dir.join("readme.md"), "ignored").unwrap();

        let loader = loader(dir);
        let keys = loader.discover_and_load().await;

        assert_eq!(keys, vec!["a_quiz", "b_stats"]);
        assert_eq!(loader.plugins.list_keys_by_category(PluginCategory::Dashboard), vec!["b_stats"]);
        assert!(loader.plugins.get("c_hooks_only").is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(&tmp.path().join("nope"));
        assert!(loader.discover_and_load().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_keeps_data_and_replaces_hooks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("banner.yaml");
        std::fs::write(
            &path,
            "default:\n  render:\n    text: v1\nhooks:\n  - point: header:before\n    render:\n      text: old\n",
        )
        .unwrap();

        let loader = loader(tmp.path());
        assert_eq!(loader.load_one(&path).await.as_deref(), Some("banner"));
        loader.plugins.set_data("banner", json!({"seen": 2})).unwrap();

        std::fs::write(
            &path,
            "default:\n  render:\n    text: v2\nhooks:\n  - point: footer:after\n    render:\n      text: new\n",
        )
        .unwrap();
        assert_eq!(loader.load_one(&path).await.as_deref(), Some("banner"));

        assert_eq!(loader.plugins.get_data("banner"), Some(json!({"seen": 2})));
        assert!(!loader.hooks.has(points::HEADER_BEFORE));
        assert_eq!(loader.hooks.get(points::FOOTER_AFTER)[0].owner_key, "banner");

        assert_eq!(loader.unload(&path).as_deref(), Some("banner"));
        assert!(loader.plugins.get("banner").is_none());
        assert!(loader.hooks.points().is_empty());
    }

    #[tokio::test]
    async fn test_load_one_failure_returns_none() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(tmp.path());
        assert_eq!(loader.load_one(tmp.path().join("missing.yaml")).await, None);
    }
}
