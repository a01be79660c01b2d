use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid data file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Backing storage for plugin data blobs, keyed by plugin key.
pub trait PluginDataStoreType: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    /// Stores `null` for `key` unless something is stored already.
    fn init_if_absent(&self, key: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Vec<String>;
    fn clear(&self) -> Result<(), StoreError>;
    fn debug_box(&self) -> String;
}

pub struct PluginDataStore(pub Box<dyn PluginDataStoreType>);

impl PluginDataStore {
    pub fn in_memory() -> Self {
        PluginDataStore(Box::new(InMemoryDataStore::default()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(PluginDataStore(Box::new(FileDataStore::open(path)?)))
    }
}

impl std::ops::Deref for PluginDataStore {
    type Target = dyn PluginDataStoreType;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for PluginDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

// -----------------------------------------------------------------------------
// In-memory
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    data: DashMap<String, Value>,
}

impl PluginDataStoreType for InMemoryDataStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn init_if_absent(&self, key: &str) -> Result<(), StoreError> {
        self.data.entry(key.to_string()).or_insert(Value::Null);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.data.iter().map(|e| e.key().clone()).collect()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.data.clear();
        Ok(())
    }

    fn debug_box(&self) -> String {
        format!("InMemoryDataStore({} keys)", self.data.len())
    }
}

// -----------------------------------------------------------------------------
// JSON file
// -----------------------------------------------------------------------------

/// Keeps every blob in one JSON object on disk. The file is read once on open
/// and rewritten after each mutation.
#[derive(Debug)]
pub struct FileDataStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, Value>>,
}

impl FileDataStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), keys = data.len(), "opened plugin data store");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) -> bool,
    {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        // mutate a copy; memory only changes once the file is written
        let mut next = data.clone();
        if f(&mut next) {
            self.persist(&next)?;
            *data = next;
        }
        Ok(())
    }

    fn persist(&self, data: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let body = serde_json::to_string_pretty(data).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        // write then rename
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io)?;
        fs::rename(&tmp, &self.path).map_err(io)
    }
}

impl PluginDataStoreType for FileDataStore {
    fn get(&self, key: &str) -> Option<Value> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|data| {
            data.insert(key.to_string(), value);
            true
        })
    }

    fn init_if_absent(&self, key: &str) -> Result<(), StoreError> {
        self.update(|data| {
            if data.contains_key(key) {
                return false;
            }
            data.insert(key.to_string(), Value::Null);
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|data| data.remove(key).is_some())
    }

    fn keys(&self) -> Vec<String> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.keys().cloned().collect()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|data| {
            if data.is_empty() {
                return false;
            }
            data.clear();
            true
        })
    }

    fn debug_box(&self) -> String {
        format!("FileDataStore({})", self.path.display())
    }
}

/// Opens the file store, falling back to memory when the file is unusable.
pub fn open_or_in_memory(path: &Path) -> PluginDataStore {
    match PluginDataStore::file(path) {
        Ok(store) => store,
        Err(e) => {
            warn!(%e, "plugin data will not survive a restart");
            PluginDataStore::in_memory()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_init_if_absent_keeps_existing_data() {
        let store = PluginDataStore::in_memory();
        store.set("quiz", json!({"score": 3})).unwrap();
        store.init_if_absent("quiz").unwrap();
        store.init_if_absent("fresh").unwrap();

        assert_eq!(store.get("quiz"), Some(json!({"score": 3})));
        assert_eq!(store.get("fresh"), Some(Value::Null));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("plugin-data.json");

        {
            let store = FileDataStore::open(&path).unwrap();
            store.set("quiz", json!({"score": 3})).unwrap();
            store.init_if_absent("notes").unwrap();
            store.set("gone", json!(1)).unwrap();
            store.remove("gone").unwrap();
        }

        let reopened = FileDataStore::open(&path).unwrap();
        assert_eq!(reopened.get("quiz"), Some(json!({"score": 3})));
        assert_eq!(reopened.get("notes"), Some(Value::Null));
        assert_eq!(reopened.get("gone"), None);
        assert_eq!(reopened.keys(), vec!["notes".to_string(), "quiz".to_string()]);
    }

    #[test]
    fn test_failed_write_leaves_data_untouched() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let store = FileDataStore::open(blocker.join("plugin-data.json")).unwrap();
        let err = store.set("quiz", json!({"threshold": 5})).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(store.get("quiz"), None);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plugin-data.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(FileDataStore::open(&path), Err(StoreError::Parse { .. })));
        let fallback = open_or_in_memory(&path);
        assert!(fallback.keys().is_empty());
    }
}
