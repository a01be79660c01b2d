use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const PLUGINS_DIR_KEY: &str = "FLOWDECK_PLUGINS_DIR";
pub const DATA_FILE_KEY: &str = "FLOWDECK_DATA_FILE";
pub const LOG_LEVEL_KEY: &str = "FLOWDECK_LOG_LEVEL";
pub const STRICT_TEMPLATES_KEY: &str = "FLOWDECK_STRICT_TEMPLATES";
pub const WATCH_KEY: &str = "FLOWDECK_WATCH";

/// Key/value configuration source. Implementations are serializable so a
/// manager can be stored alongside other runtime settings.
#[async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn del(&self, key: &str);
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn env(env_file: PathBuf) -> Self {
        ConfigManager(EnvConfigManager::new(env_file))
    }

    pub fn in_memory() -> Self {
        ConfigManager(MapConfigManager::new())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.0.set(key, value).await
    }

    async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).await.as_deref().map(str::trim) {
            None | Some("") => default,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    warn!(key, value = other, "not a boolean, using default {default}");
                    default
                }
            },
        }
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

// -----------------------------------------------------------------------------
// .env backed
// -----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(e) => warn!(?e, "could not parse {}", env_file.display()),
            }
        } else {
            info!("no .env at {}, using process environment", env_file.display());
        }
        Box::new(Self { env_file })
    }

    fn rewrite_file(&self, key: &str, value: Option<&str>) -> Result<()> {
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut found = false;
        let mut lines: Vec<String> = Vec::new();
        for line in content.lines() {
            let matches = line
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key);
            if !matches {
                lines.push(line.to_string());
                continue;
            }
            found = true;
            if let Some(value) = value {
                lines.push(format!("{key}={value}"));
            }
        }
        if let (false, Some(value)) = (found, value) {
            lines.push(format!("{key}={value}"));
        }
        fs::write(&self.env_file, lines.join("\n"))
            .with_context(|| format!("writing {}", self.env_file.display()))
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        unsafe {
            env::set_var(key, value);
        }
        self.rewrite_file(key, Some(value))
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        }
        if self.env_file.exists() {
            if let Err(e) = self.rewrite_file(key, None) {
                warn!(?e, key, "could not remove key from .env");
            }
        }
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

// -----------------------------------------------------------------------------
// In-memory
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

// -----------------------------------------------------------------------------
// Typed runtime settings
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    pub root: PathBuf,
    pub plugins_dir: PathBuf,
    pub data_file: PathBuf,
    pub log_level: String,
    pub strict_templates: bool,
    pub watch: bool,
}

impl RuntimeConfig {
    /// Defaults for a root directory, without consulting any config source.
    pub fn defaults(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            plugins_dir: root.join("plugins"),
            data_file: root.join("data").join("plugin-data.json"),
            log_level: "info".to_string(),
            strict_templates: false,
            watch: true,
        }
    }

    /// Reads the `FLOWDECK_*` keys from `config`. Relative paths are taken
    /// relative to `root`.
    pub async fn load(config: &ConfigManager, root: &Path) -> Self {
        let defaults = Self::defaults(root);
        let path_or = |value: Option<String>, default: PathBuf| match value {
            Some(v) if !v.trim().is_empty() => {
                let p = PathBuf::from(v.trim());
                if p.is_absolute() { p } else { root.join(p) }
            }
            _ => default,
        };

        Self {
            plugins_dir: path_or(config.get(PLUGINS_DIR_KEY).await, defaults.plugins_dir),
            data_file: path_or(config.get(DATA_FILE_KEY).await, defaults.data_file),
            log_level: config
                .get(LOG_LEVEL_KEY)
                .await
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_level),
            strict_templates: config.get_bool(STRICT_TEMPLATES_KEY, defaults.strict_templates).await,
            watch: config.get_bool(WATCH_KEY, defaults.watch).await,
            root: defaults.root,
        }
    }
}
