use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flowdeck_plugin::{
    AppContext, Component, ComponentHandle, Placement, PluginCategory, Render, RenderError,
    ResolveOptions, hook::split_point,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML manifest {path}: {message}")]
    Yaml { path: PathBuf, message: String },
    #[error("invalid JSON manifest {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("not a plugin module: {0}")]
    Unsupported(PathBuf),
}

/// What importing one module yields.
#[derive(Debug, Default)]
pub struct PluginModule {
    pub default_export: Option<ComponentHandle>,
    pub category: Option<PluginCategory>,
    pub hooks: Vec<HookExport>,
}

#[derive(Debug)]
pub struct HookExport {
    pub point: String,
    pub placement: Placement,
    pub priority: Option<i32>,
    pub component: ComponentHandle,
}

/// Turns a module location into components.
#[async_trait]
pub trait ModuleImporter: Send + Sync {
    /// Whether `path` looks like a module this importer understands.
    fn accepts(&self, path: &Path) -> bool;

    async fn import(&self, location: &Path) -> Result<PluginModule, ImportError>;
}

// -----------------------------------------------------------------------------
// Manifest format
// -----------------------------------------------------------------------------

/// A declarative plugin module, stored as YAML or JSON.
///
/// ```yaml
/// default:
///   category: flow
///   render:
///     template: "Thanks {{name}}, your score is {{quiz.content.score}}"
///   schema: { type: object }
/// hooks:
///   - point: header:before
///     priority: -10
///     render:
///       text: "Beta"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PluginManifest {
    /// The component registered under the module key. Required.
    #[serde(default)]
    pub default: Option<ComponentManifest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComponentManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<PluginCategory>,
    pub render: RenderManifest,
    /// JSON schema the plugin's data must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HookManifest {
    pub point: String,
    /// Defaults to the point's suffix (`header:before` -> before), else `after`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub render: RenderManifest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RenderManifest {
    /// Resolved against the session context on every render.
    Template(String),
    /// Emitted as is.
    Text(String),
}

impl HookManifest {
    pub fn effective_placement(&self) -> Placement {
        self.placement.unwrap_or_else(|| {
            split_point(&self.point)
                .1
                .and_then(|suffix| suffix.parse().ok())
                .unwrap_or(Placement::After)
        })
    }
}

struct TemplateRender {
    template: String,
    strict: bool,
}

impl Render for TemplateRender {
    fn render(&self, ctx: &mut AppContext<'_>) -> Result<String, RenderError> {
        let options = ResolveOptions {
            strict: self.strict,
            debug: false,
        };
        Ok(ctx.context.resolve(&self.template, options)?)
    }
}

struct TextRender(String);

impl Render for TextRender {
    fn render(&self, _ctx: &mut AppContext<'_>) -> Result<String, RenderError> {
        Ok(self.0.clone())
    }
}

fn build_component(name: &str, render: &RenderManifest, strict: bool) -> Component {
    match render {
        RenderManifest::Template(template) => Component::new(
            name,
            TemplateRender {
                template: template.clone(),
                strict,
            },
        ),
        RenderManifest::Text(text) => Component::new(name, TextRender(text.clone())),
    }
}

impl PluginManifest {
    /// Builds the module. `key` names the components, `strict` applies to
    /// template tokens.
    pub fn into_module(self, key: &str, strict: bool) -> PluginModule {
        let mut category = None;
        let default_export = self.default.map(|exported| {
            category = exported.category;
            let mut component = build_component(key, &exported.render, strict);
            if let Some(schema) = exported.schema {
                component = component.with_schema(schema);
            }
            if let Some(settings) = exported.settings {
                component = component.with_settings(settings);
            }
            component.into_handle()
        });

        let hooks = self
            .hooks
            .iter()
            .map(|hook| HookExport {
                point: hook.point.clone(),
                placement: hook.effective_placement(),
                priority: hook.priority,
                component: build_component(&format!("{key}@{}", hook.point), &hook.render, strict)
                    .into_handle(),
            })
            .collect();

        PluginModule {
            default_export,
            category,
            hooks,
        }
    }
}

// -----------------------------------------------------------------------------
// Importer
// -----------------------------------------------------------------------------

pub const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Imports `.yaml` / `.yml` / `.json` manifests from disk.
#[derive(Debug, Clone, Default)]
pub struct ManifestImporter {
    pub strict_templates: bool,
}

impl ManifestImporter {
    pub fn new(strict_templates: bool) -> Self {
        Self { strict_templates }
    }

    pub fn parse(path: &Path, raw: &str) -> Result<PluginManifest, ImportError> {
        match extension(path) {
            Some("json") => serde_json::from_str(raw).map_err(|source| ImportError::Json {
                path: path.to_path_buf(),
                source,
            }),
            Some("yaml" | "yml") => {
                serde_yaml_bw::from_str(raw).map_err(|e| ImportError::Yaml {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
            _ => Err(ImportError::Unsupported(path.to_path_buf())),
        }
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

#[async_trait]
impl ModuleImporter for ManifestImporter {
    fn accepts(&self, path: &Path) -> bool {
        extension(path).is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
    }

    async fn import(&self, location: &Path) -> Result<PluginModule, ImportError> {
        if !self.accepts(location) {
            return Err(ImportError::Unsupported(location.to_path_buf()));
        }
        let raw = tokio::fs::read_to_string(location)
            .await
            .map_err(|source| ImportError::Io {
                path: location.to_path_buf(),
                source,
            })?;
        let manifest = Self::parse(location, &raw)?;
        let key = location
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plugin");
        Ok(manifest.into_module(key, self.strict_templates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_plugin::{Capability, FlowContextHandler};
    use tempfile::TempDir;

    const QUIZ: &str = r#"
default:
  category: dashboard
  render:
    template: "Score: {{score}}"
  schema:
    type: object
hooks:
  - point: header:before
    priority: -10
    render:
      text: "Beta"
  - point: leftPanel:top
    render:
      text: "Help"
"#;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = ManifestImporter::parse(Path::new("quiz.yaml"), QUIZ).unwrap();
        let default = manifest.default.as_ref().unwrap();
        assert_eq!(default.category, Some(PluginCategory::Dashboard));
        assert_eq!(default.render, RenderManifest::Template("Score: {{score}}".into()));
        assert_eq!(manifest.hooks[0].effective_placement(), Placement::Before);
        // panels have no placement suffix
        assert_eq!(manifest.hooks[1].effective_placement(), Placement::After);
    }

    #[test]
    fn test_module_renders_templates() {
        let manifest = ManifestImporter::parse(Path::new("quiz.yaml"), QUIZ).unwrap();
        let module = manifest.into_module("quiz", false);
        let component = module.default_export.unwrap();
        assert!(component.has(Capability::Schema));
        assert!(!component.has(Capability::Settings));

        let mut handler = FlowContextHandler::default();
        handler.set_user_input("score", "7");
        let mut ctx = AppContext::new(&mut handler);
        assert_eq!(component.render(&mut ctx).unwrap(), "Score: 7");
        assert_eq!(module.hooks[0].component.render(&mut ctx).unwrap(), "Beta");
        assert_eq!(module.hooks[0].priority, Some(-10));
    }

    #[test]
    fn test_strict_template_fails_render() {
        let raw = r#"{"default": {"render": {"template": "{{missing}}"}}}"#;
        let module = ManifestImporter::parse(Path::new("m.json"), raw)
            .unwrap()
            .into_module("m", true);
        let mut handler = FlowContextHandler::default();
        let mut ctx = AppContext::new(&mut handler);
        assert!(matches!(
            module.default_export.unwrap().render(&mut ctx),
            Err(RenderError::Resolve(_))
        ));
    }

    #[tokio::test]
    async fn test_import_from_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.json");
        tokio::fs::write(&path, r#"{"default": {"render": {"text": "Notes"}}}"#)
            .await
            .unwrap();

        let importer = ManifestImporter::default();
        let module = importer.import(&path).await.unwrap();
        assert_eq!(module.default_export.unwrap().name(), "notes");
        assert!(module.category.is_none());

        let missing = importer.import(&tmp.path().join("gone.yaml")).await;
        assert!(matches!(missing, Err(ImportError::Io { .. })));
        let other = importer.import(&tmp.path().join("script.js")).await;
        assert!(matches!(other, Err(ImportError::Unsupported(_))));
    }
}
