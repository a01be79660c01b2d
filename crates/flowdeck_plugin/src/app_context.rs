use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ContextItem, FlowContextHandler};

// -----------------------------------------------------------------------------
// Read-only snapshots handed to components
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Key of the plugin rendering the body of this step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub assistant_message: String,
    #[serde(default)]
    pub data: Value,
}

impl NodeSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            plugin: None,
            user_prompt: String::new(),
            assistant_message: String::new(),
            data: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSnapshot {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Context items every playback of this scenario starts with.
    #[serde(default)]
    pub context: Vec<ContextItem>,
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub workspace_id: Option<String>,
    pub scenario_id: Option<String>,
    pub node_id: Option<String>,
}

// -----------------------------------------------------------------------------
// Host callbacks
// -----------------------------------------------------------------------------

pub type TextCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type StepCallback = Arc<dyn Fn() + Send + Sync>;

/// Optional hooks back into the host. A missing callback means the action is
/// not available where the component is rendered.
#[derive(Clone, Default)]
pub struct HostCallbacks {
    pub update_node_user_prompt: Option<TextCallback>,
    pub update_node_assistant_message: Option<TextCallback>,
    pub next_step: Option<StepCallback>,
    pub prev_step: Option<StepCallback>,
}

/// Callbacks for components rendered outside a playback session.
pub static NO_CALLBACKS: HostCallbacks = HostCallbacks::none();

impl HostCallbacks {
    pub const fn none() -> Self {
        Self {
            update_node_user_prompt: None,
            update_node_assistant_message: None,
            next_step: None,
            prev_step: None,
        }
    }

    // Each helper returns whether the host supports the action.

    pub fn update_node_user_prompt(&self, prompt: impl Into<String>) -> bool {
        call_text(&self.update_node_user_prompt, prompt.into())
    }

    pub fn update_node_assistant_message(&self, message: impl Into<String>) -> bool {
        call_text(&self.update_node_assistant_message, message.into())
    }

    pub fn next_step(&self) -> bool {
        call_step(&self.next_step)
    }

    pub fn prev_step(&self) -> bool {
        call_step(&self.prev_step)
    }
}

fn call_text(callback: &Option<TextCallback>, value: String) -> bool {
    match callback {
        Some(cb) => {
            cb(value);
            true
        }
        None => false,
    }
}

fn call_step(callback: &Option<StepCallback>) -> bool {
    match callback {
        Some(cb) => {
            cb();
            true
        }
        None => false,
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("update_node_user_prompt", &self.update_node_user_prompt.is_some())
            .field("update_node_assistant_message", &self.update_node_assistant_message.is_some())
            .field("next_step", &self.next_step.is_some())
            .field("prev_step", &self.prev_step.is_some())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// AppContext
// -----------------------------------------------------------------------------

/// Everything a component sees while it renders.
pub struct AppContext<'a> {
    pub selection: Selection,
    pub workspace: Option<&'a WorkspaceSnapshot>,
    pub scenario: Option<&'a ScenarioSnapshot>,
    pub node: Option<&'a NodeSnapshot>,
    /// Bumped by the host on every relevant mutation.
    pub state_version: u64,
    pub context: &'a mut FlowContextHandler,
    pub callbacks: &'a HostCallbacks,
}

impl<'a> AppContext<'a> {
    pub fn new(context: &'a mut FlowContextHandler) -> Self {
        Self {
            selection: Selection::default(),
            workspace: None,
            scenario: None,
            node: None,
            state_version: 0,
            context,
            callbacks: &NO_CALLBACKS,
        }
    }

    pub fn with_callbacks(mut self, callbacks: &'a HostCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_workspace(mut self, workspace: &'a WorkspaceSnapshot) -> Self {
        self.selection.workspace_id = Some(workspace.id.clone());
        self.workspace = Some(workspace);
        self
    }

    pub fn with_scenario(mut self, scenario: &'a ScenarioSnapshot) -> Self {
        self.selection.scenario_id = Some(scenario.id.clone());
        self.scenario = Some(scenario);
        self
    }

    pub fn with_node(mut self, node: &'a NodeSnapshot) -> Self {
        self.selection.node_id = Some(node.id.clone());
        self.node = Some(node);
        self
    }

    pub fn with_state_version(mut self, state_version: u64) -> Self {
        self.state_version = state_version;
        self
    }
}
