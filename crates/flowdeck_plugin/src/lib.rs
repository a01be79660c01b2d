pub mod app_context;
pub mod component;
pub mod context;
pub mod hook;
pub mod resolver;

pub use app_context::{
    AppContext, HostCallbacks, NodeSnapshot, ScenarioSnapshot, Selection, WorkspaceSnapshot,
};
pub use component::{Capability, Component, ComponentHandle, PluginCategory, Render, RenderError};
pub use context::{ContextItem, ContextObservers, FlowContextHandler};
pub use hook::{DEFAULT_PRIORITY, HookRegistration, Placement, points};
pub use resolver::{ResolveError, ResolveOptions, UserInputs};
