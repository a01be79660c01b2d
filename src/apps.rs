use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::{DATA_FILE_KEY, LOG_LEVEL_KEY, PLUGINS_DIR_KEY, RuntimeConfig, STRICT_TEMPLATES_KEY, WATCH_KEY},
    host::ExtensionHost,
    plugin::{ManifestImporter, PluginLoader, store::open_or_in_memory},
    watcher::{DirectoryWatcher, PluginWatcher},
};

/// The running runtime: one extension host, its loader and, optionally, the
/// plugin directory watcher.
pub struct App {
    config: RuntimeConfig,
    host: Arc<ExtensionHost>,
    loader: PluginLoader,
    watcher: Option<DirectoryWatcher>,
}

impl App {
    /// Opens the data store, discovers plugins and starts hot reload when
    /// `config.watch` is set.
    pub async fn bootstrap(config: RuntimeConfig) -> Result<App> {
        let data = open_or_in_memory(&config.data_file);
        let host = Arc::new(ExtensionHost::new(data));

        if !config.plugins_dir.exists() {
            fs::create_dir_all(&config.plugins_dir)
                .with_context(|| format!("creating {}", config.plugins_dir.display()))?;
        }
        let loader = PluginLoader::new(
            host.plugins().clone(),
            host.hooks().clone(),
            Arc::new(ManifestImporter::new(config.strict_templates)),
            config.plugins_dir.clone(),
        );

        let keys = loader.discover_and_load().await;
        info!(plugins = keys.len(), "plugins discovered");

        let watcher = if config.watch {
            match PluginWatcher::start(loader.clone()).await {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(?e, "plugin hot reload disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(App {
            config,
            host,
            loader,
            watcher,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<ExtensionHost> {
        &self.host
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn shutdown(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.shutdown();
        }
        info!("flowdeck shut down");
    }
}

const EXAMPLE_PLUGIN: &str = r#"# Rendered as the body of any node with `plugin: welcome`.
default:
  category: flow
  render:
    template: "Welcome aboard, {{name}}!"
  schema:
    type: object
    properties:
      greeting:
        type: string
hooks:
  - point: header:after
    priority: 10
    render:
      text: "-- powered by flowdeck --"
"#;

const EXAMPLE_SCENARIO: &str = r#"id: demo
title: Demo
context:
  - id: name
    content: guest
nodes:
  - id: ask-name
    assistantMessage: "Hi {{name}}, what should I call you?"
    userPrompt: "Type your name"
  - id: welcome
    plugin: welcome
    assistantMessage: "Nice to meet you, {{ask-name}}."
"#;

/// Creates the directory layout under `root` plus a default `.env`, an
/// example plugin and an example scenario. Existing files are left alone.
pub fn cmd_init(root: &Path) -> Result<()> {
    for dir in ["config", "plugins", "scenarios", "data", "logs", "schemas"] {
        let path = root.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
    }

    let env = format!(
        "{PLUGINS_DIR_KEY}=plugins\n{DATA_FILE_KEY}=data/plugin-data.json\n{LOG_LEVEL_KEY}=info\n{STRICT_TEMPLATES_KEY}=false\n{WATCH_KEY}=true\n"
    );
    write_if_missing(&root.join("config").join(".env"), &env)?;
    write_if_missing(&root.join("plugins").join("welcome.yaml"), EXAMPLE_PLUGIN)?;
    write_if_missing(&root.join("scenarios").join("demo.yaml"), EXAMPLE_SCENARIO)?;
    Ok(())
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("Skipping {}, already exists", path.display());
        return Ok(());
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ConfigManager, player::{Playback, read_scenario}};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_bootstrap_plays_demo() {
        let tmp = TempDir::new().unwrap();
        cmd_init(tmp.path()).unwrap();
        // second init keeps files
        cmd_init(tmp.path()).unwrap();

        let mut config = RuntimeConfig::load(&ConfigManager::in_memory(), tmp.path()).await;
        config.watch = false;
        let app = App::bootstrap(config).await.unwrap();
        assert_eq!(app.host().plugins().list_keys(), vec!["welcome"]);
        assert!(!app.is_watching());

        let scenario = read_scenario(&tmp.path().join("scenarios").join("demo.yaml")).unwrap();
        let mut playback = Playback::new(app.host().clone(), scenario).unwrap();

        let first = playback.render_current().unwrap();
        assert_eq!(first.main[0], "Demo");
        assert_eq!(first.main[1], "-- powered by flowdeck --");
        assert_eq!(first.main[3], "Hi guest, what should I call you?");

        playback.submit_input("Ann").unwrap();
        playback.next_step();
        let second = playback.render_current().unwrap();
        assert!(second.main.contains(&"Nice to meet you, Ann.".to_string()));
        assert!(second.main.contains(&"Welcome aboard, guest!".to_string()));

        app.shutdown();
    }

    #[tokio::test]
    async fn test_plugin_data_survives_restart() {
        let tmp = TempDir::new().unwrap();
        cmd_init(tmp.path()).unwrap();
        let mut config = RuntimeConfig::defaults(tmp.path());
        config.watch = false;

        let app = App::bootstrap(config.clone()).await.unwrap();
        app.host()
            .configure_plugin("welcome", serde_json::json!({"greeting": "hoi"}))
            .unwrap();
        app.shutdown();

        let again = App::bootstrap(config).await.unwrap();
        assert_eq!(
            again.host().plugin_data("welcome"),
            Some(serde_json::json!({"greeting": "hoi"}))
        );
    }
}
