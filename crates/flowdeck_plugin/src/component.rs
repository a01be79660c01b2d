use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::app_context::AppContext;
use crate::resolver::ResolveError;

// -----------------------------------------------------------------------------
// Categories & capabilities
// -----------------------------------------------------------------------------

/// Where a plugin shows up in the host. Unset categories default to `Flow`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash,
    EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    #[default]
    Flow,
    Dashboard,
}

/// Optional facets a component may carry next to its renderer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash,
    EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Render,
    Schema,
    Settings,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("render failed: {0}")]
    Failed(String),
}

// -----------------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------------

/// Anything that can turn the current [`AppContext`] into a fragment of output.
///
/// Implementations may read and write the flow context and call the host
/// callbacks carried by the context.
pub trait Render: Send + Sync {
    fn render(&self, ctx: &mut AppContext<'_>) -> Result<String, RenderError>;
}

struct FnRender<F>(F);

impl<F> Render for FnRender<F>
where
    F: Fn(&mut AppContext<'_>) -> Result<String, RenderError> + Send + Sync,
{
    fn render(&self, ctx: &mut AppContext<'_>) -> Result<String, RenderError> {
        (self.0)(ctx)
    }
}

/// A renderable unit with optional schema and settings.
///
/// The registry keeps one shared [`ComponentHandle`] per key; components are
/// never cloned by the host.
pub struct Component {
    name: String,
    render: Arc<dyn Render>,
    schema: Option<Value>,
    settings: Option<Value>,
}

pub type ComponentHandle = Arc<Component>;

impl Component {
    pub fn new(name: impl Into<String>, render: impl Render + 'static) -> Self {
        Self {
            name: name.into(),
            render: Arc::new(render),
            schema: None,
            settings: None,
        }
    }

    /// Builds a component from a closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut AppContext<'_>) -> Result<String, RenderError> + Send + Sync + 'static,
    {
        Self::new(name, FnRender(f))
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn into_handle(self) -> ComponentHandle {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    pub fn settings(&self) -> Option<&Value> {
        self.settings.as_ref()
    }

    /// Capability check used by the host instead of inspecting fields directly.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Render => true,
            Capability::Schema => self.schema.is_some(),
            Capability::Settings => self.settings.is_some(),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        [Capability::Render, Capability::Schema, Capability::Settings]
            .into_iter()
            .filter(|c| self.has(*c))
            .collect()
    }

    pub fn render(&self, ctx: &mut AppContext<'_>) -> Result<String, RenderError> {
        self.render.render(ctx)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
