use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, bail};
use flowdeck_plugin::{
    AppContext, ContextObservers, FlowContextHandler, HostCallbacks, NodeSnapshot,
    ScenarioSnapshot, WorkspaceSnapshot, points,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    host::{ExtensionHost, Lookup},
    hooks::{render_panel, render_slot},
    logger::EVENT_TARGET,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("scenario '{0}' has no nodes")]
    EmptyScenario(String),
    #[error("playback has finished")]
    Finished,
}

/// Requests made by components through [`HostCallbacks`]. They are queued
/// while a step renders and applied once it is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    UpdateUserPrompt(String),
    UpdateAssistantMessage(String),
    NextStep,
    PrevStep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedStep {
    pub node_id: String,
    pub position: usize,
    pub total: usize,
    pub state_version: u64,
    pub main: Vec<String>,
    pub left_panel: Vec<String>,
    pub right_panel: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct NodeEdits {
    user_prompt: Option<String>,
    assistant_message: Option<String>,
}

type CommandQueue = Arc<Mutex<VecDeque<HostCommand>>>;

/// One run through a scenario.
pub struct Playback {
    id: Uuid,
    host: Arc<ExtensionHost>,
    workspace: Option<WorkspaceSnapshot>,
    scenario: ScenarioSnapshot,
    position: usize,
    state_version: Arc<AtomicU64>,
    context: FlowContextHandler,
    edits: HashMap<String, NodeEdits>,
    commands: CommandQueue,
    callbacks: HostCallbacks,
}

impl Playback {
    pub fn new(host: Arc<ExtensionHost>, scenario: ScenarioSnapshot) -> Result<Self, PlaybackError> {
        if scenario.nodes.is_empty() {
            return Err(PlaybackError::EmptyScenario(scenario.id.clone()));
        }

        let id = Uuid::new_v4();
        let state_version = Arc::new(AtomicU64::new(0));
        let context = FlowContextHandler::new(
            scenario.context.clone(),
            version_observers(state_version.clone()),
        );
        let commands: CommandQueue = Arc::new(Mutex::new(VecDeque::new()));
        let callbacks = queue_callbacks(&commands);

        info!(%id, scenario = %scenario.id, nodes = scenario.nodes.len(), "playback started");
        Ok(Self {
            id,
            host,
            workspace: None,
            scenario,
            position: 0,
            state_version,
            context,
            edits: HashMap::new(),
            commands,
            callbacks,
        })
    }

    pub fn with_workspace(mut self, workspace: WorkspaceSnapshot) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total(&self) -> usize {
        self.scenario.nodes.len()
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.total()
    }

    pub fn state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> &FlowContextHandler {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut FlowContextHandler {
        &mut self.context
    }

    /// The node at the current position, with prompt/message edits applied.
    pub fn current_node(&self) -> Option<NodeSnapshot> {
        let mut node = self.scenario.nodes.get(self.position)?.clone();
        if let Some(edits) = self.edits.get(&node.id) {
            if let Some(prompt) = &edits.user_prompt {
                node.user_prompt = prompt.clone();
            }
            if let Some(message) = &edits.assistant_message {
                node.assistant_message = message.clone();
            }
        }
        Some(node)
    }

    /// Renders the current step through the fixed pipeline:
    /// header, navigation, assistantMessage, plugin body, userInput, footer,
    /// then the four panel points.
    pub fn render_current(&mut self) -> Result<RenderedStep, PlaybackError> {
        let node = self.current_node().ok_or(PlaybackError::Finished)?;
        let host = self.host.clone();
        let hooks = host.hooks().clone();
        let total = self.total();
        let position = self.position;
        let title = self.scenario.title.clone();

        let mut ctx = AppContext::new(&mut self.context)
            .with_callbacks(&self.callbacks)
            .with_scenario(&self.scenario)
            .with_node(&node)
            .with_state_version(self.state_version.load(Ordering::SeqCst));
        if let Some(workspace) = &self.workspace {
            ctx = ctx.with_workspace(workspace);
        }

        let mut main = Vec::new();
        main.extend(render_slot(&hooks, points::HEADER, &mut ctx, |_| non_empty(title)));
        main.extend(render_slot(&hooks, points::NAVIGATION, &mut ctx, |_| {
            Some(format!("Step {} of {}", position + 1, total))
        }));
        main.extend(render_slot(&hooks, points::ASSISTANT_MESSAGE, &mut ctx, |ctx| {
            non_empty(ctx.context.resolve_text(&node.assistant_message))
        }));
        if let Some(key) = node.plugin.as_deref() {
            main.push(render_body(&host, key, &mut ctx));
        }
        main.extend(render_slot(&hooks, points::USER_INPUT, &mut ctx, |ctx| {
            non_empty(ctx.context.resolve_text(&node.user_prompt))
        }));
        main.extend(render_slot(&hooks, points::FOOTER, &mut ctx, |_| None));

        let mut left_panel = render_panel(&hooks, points::LEFT_PANEL_TOP, &mut ctx);
        left_panel.extend(render_panel(&hooks, points::LEFT_PANEL_BOTTOM, &mut ctx));
        let mut right_panel = render_panel(&hooks, points::RIGHT_PANEL_TOP, &mut ctx);
        right_panel.extend(render_panel(&hooks, points::RIGHT_PANEL_BOTTOM, &mut ctx));

        let step = RenderedStep {
            node_id: node.id.clone(),
            position,
            total,
            state_version: ctx.state_version,
            main,
            left_panel,
            right_panel,
        };

        self.apply_commands(&node.id);
        info!(target: EVENT_TARGET, playback = %self.id, node = %node.id, position, "step rendered");
        Ok(step)
    }

    /// Moves forward. Stepping past the last node finishes the playback.
    pub fn next_step(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.position += 1;
        self.bump();
        true
    }

    pub fn prev_step(&mut self) -> bool {
        if self.position == 0 {
            return false;
        }
        self.position -= 1;
        self.bump();
        true
    }

    /// Records the user's answer for the current node, keyed by node id.
    pub fn submit_input(&mut self, value: impl Into<String>) -> Result<(), PlaybackError> {
        let node_id = self
            .scenario
            .nodes
            .get(self.position)
            .map(|n| n.id.clone())
            .ok_or(PlaybackError::Finished)?;
        self.context.set_user_input(&node_id, value);
        Ok(())
    }

    /// Back to the first node with the scenario's initial context.
    pub fn restart(&mut self) {
        self.position = 0;
        self.edits.clear();
        self.context.reset(Some(self.scenario.context.clone()));
        self.bump();
    }

    fn bump(&self) {
        self.state_version.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_commands(&mut self, node_id: &str) {
        let pending: Vec<HostCommand> = {
            let mut queue = self.commands.lock().unwrap_or_else(|e| e.into_inner());
            queue.drain(..).collect()
        };
        for command in pending {
            debug!(playback = %self.id, ?command, "applying host command");
            match command {
                HostCommand::NextStep => {
                    self.next_step();
                }
                HostCommand::PrevStep => {
                    self.prev_step();
                }
                HostCommand::UpdateUserPrompt(prompt) => {
                    self.edits.entry(node_id.to_string()).or_default().user_prompt = Some(prompt);
                    self.bump();
                }
                HostCommand::UpdateAssistantMessage(message) => {
                    self.edits.entry(node_id.to_string()).or_default().assistant_message =
                        Some(message);
                    self.bump();
                }
            }
        }
    }
}

impl std::fmt::Debug for Playback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playback")
            .field("id", &self.id)
            .field("scenario", &self.scenario.id)
            .field("position", &self.position)
            .field("state_version", &self.state_version())
            .finish_non_exhaustive()
    }
}

fn render_body(host: &ExtensionHost, key: &str, ctx: &mut AppContext<'_>) -> String {
    match host.lookup(key) {
        Lookup::Ready(component) => component.render(ctx).unwrap_or_else(|e| {
            warn!(plugin = key, %e, "plugin failed to render");
            format!("[plugin '{key}' failed to render]")
        }),
        Lookup::Disabled(_) => format!("[plugin '{key}' is disabled]"),
        Lookup::NotFound => format!("[plugin '{key}' not found]"),
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}

fn version_observers(version: Arc<AtomicU64>) -> ContextObservers {
    ContextObservers::default().on_update(move |key, _value, path| {
        version.fetch_add(1, Ordering::SeqCst);
        debug!(key, ?path, "context updated");
    })
}

fn queue_callbacks(commands: &CommandQueue) -> HostCallbacks {
    let push = |commands: CommandQueue, command: HostCommand| {
        commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(command);
    };

    let (q1, q2, q3, q4) = (
        commands.clone(),
        commands.clone(),
        commands.clone(),
        commands.clone(),
    );
    HostCallbacks {
        update_node_user_prompt: Some(Arc::new(move |prompt| {
            push(q1.clone(), HostCommand::UpdateUserPrompt(prompt))
        })),
        update_node_assistant_message: Some(Arc::new(move |message| {
            push(q2.clone(), HostCommand::UpdateAssistantMessage(message))
        })),
        next_step: Some(Arc::new(move || push(q3.clone(), HostCommand::NextStep))),
        prev_step: Some(Arc::new(move || push(q4.clone(), HostCommand::PrevStep))),
    }
}

/// Reads a scenario from a `.yaml`/`.yml`/`.json` file.
pub fn read_scenario(path: &Path) -> anyhow::Result<ScenarioSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let scenario = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("parsing scenario {}", path.display()))?,
        Some("yaml" | "yml") => serde_yaml_bw::from_str(&raw)
            .with_context(|| format!("parsing scenario {}", path.display()))?,
        _ => bail!("unsupported scenario file {}", path.display()),
    };
    Ok(scenario)
}
