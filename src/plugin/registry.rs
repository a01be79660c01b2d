use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use flowdeck_plugin::{ComponentHandle, PluginCategory};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::store::{PluginDataStore, StoreError};

#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub key: String,
    pub implementation: ComponentHandle,
    pub category: PluginCategory,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, PluginRecord>,
    /// keys in order of first registration
    order: Vec<String>,
}

/// Plugin key -> component, category and data blob.
///
/// Records and ordering sit behind one lock. Data blobs live in the
/// [`PluginDataStore`] so they outlive re-registration (and, with a file
/// store, the process).
pub struct PluginRegistry {
    inner: RwLock<Inner>,
    data: PluginDataStore,
}

impl PluginRegistry {
    pub fn new(data: PluginDataStore) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            data,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(PluginDataStore::in_memory())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers or overwrites `key`. A missing category means `Flow`.
    ///
    /// Overwriting keeps the key's position in [`Self::list_keys`] and its data.
    pub fn register(
        &self,
        key: &str,
        implementation: ComponentHandle,
        category: Option<PluginCategory>,
    ) {
        let category = category.unwrap_or_default();
        let is_new = {
            let mut inner = self.write();
            let record = PluginRecord {
                key: key.to_string(),
                implementation,
                category,
            };
            let is_new = inner.records.insert(key.to_string(), record).is_none();
            if is_new {
                inner.order.push(key.to_string());
            }
            is_new
        };

        if is_new {
            if let Err(e) = self.data.init_if_absent(key) {
                warn!(%e, key, "could not initialize plugin data");
            }
            info!(key, %category, "registered plugin");
        } else {
            debug!(key, %category, "re-registered plugin");
        }
    }

    /// Removes the record and its data. Returns false if `key` was unknown.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.write();
            let removed = inner.records.remove(key).is_some();
            if removed {
                inner.order.retain(|k| k != key);
            }
            removed
        };

        if let Err(e) = self.data.remove(key) {
            warn!(%e, key, "could not remove plugin data");
        }
        if removed {
            info!(key, "unregistered plugin");
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<ComponentHandle> {
        let found = self.read().records.get(key).map(|r| r.implementation.clone());
        if found.is_none() {
            warn!(key, "plugin not registered");
        }
        found
    }

    pub fn record(&self, key: &str) -> Option<PluginRecord> {
        self.read().records.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().records.contains_key(key)
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn list_keys_by_category(&self, category: PluginCategory) -> Vec<String> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter(|k| inner.records.get(*k).is_some_and(|r| r.category == category))
            .cloned()
            .collect()
    }

    /// Stores a data blob. Keys need not be registered yet, so data can be
    /// seeded before a plugin loads.
    pub fn set_data(&self, key: &str, data: Value) -> Result<(), StoreError> {
        self.data.set(key, data)
    }

    /// `None` when nothing (or `null`) is stored for `key`.
    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record. Stored data is left alone.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.records.clear();
        inner.order.clear();
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("keys", &self.list_keys())
            .field("data", &self.data)
            .finish()
    }
}
