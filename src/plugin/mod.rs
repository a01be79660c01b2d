pub mod loader;
pub mod manifest;
pub mod registry;
pub mod store;

pub use loader::{PluginLoader, derive_key};
pub use manifest::{ManifestImporter, ModuleImporter, PluginManifest, PluginModule};
pub use registry::{PluginRecord, PluginRegistry};
pub use store::{PluginDataStore, PluginDataStoreType};
