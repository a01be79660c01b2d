use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flowdeck_plugin::ScenarioSnapshot;
use schemars::schema_for;
use serde::Serialize;
use tracing::info;

use crate::{host::ExtensionHost, plugin::PluginManifest};

/// Writes JSON schemas into `out_dir`:
/// - `plugin-manifest.schema.json` for plugin modules
/// - `scenario.schema.json` for scenario files
/// - `plugin-<key>.schema.json` for every registered plugin that declares a
///   data schema
///
/// Returns the written paths.
pub fn write_schema(out_dir: &Path, host: &ExtensionHost) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut written = vec![
        write_json(out_dir, "plugin-manifest.schema.json", &schema_for!(PluginManifest))?,
        write_json(out_dir, "scenario.schema.json", &schema_for!(ScenarioSnapshot))?,
    ];

    for key in host.plugins().list_keys() {
        let Some(record) = host.plugins().record(&key) else {
            continue;
        };
        if let Some(schema) = record.implementation.schema() {
            let file = format!("plugin-{}.schema.json", key.to_lowercase());
            written.push(write_json(out_dir, &file, schema)?);
        }
    }

    info!(dir = %out_dir.display(), files = written.len(), "schemas written");
    Ok(written)
}

fn write_json<T: Serialize + ?Sized>(dir: &Path, file: &str, value: &T) -> Result<PathBuf> {
    let path = dir.join(file);
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
