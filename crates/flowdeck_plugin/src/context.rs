use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::resolver::{self, ResolveError, ResolveOptions, UserInputs, stringify, walk};

// -----------------------------------------------------------------------------
// Context items
// -----------------------------------------------------------------------------

/// A named piece of flow context. Apart from `id`, `title` and `content` an
/// item may carry any number of extra fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextItem {
    pub fn new(id: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Reads a value by walking `path` from the item object itself.
    pub fn lookup(&self, path: &[&str]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let head = match *first {
            "id" => Value::String(self.id.clone()),
            "title" => Value::String(self.title.clone()?),
            "content" => self.content.clone()?,
            other => return walk(self.extra.get(other)?, rest).cloned(),
        };
        walk(&head, rest).cloned()
    }

    /// Writes `value` at the dotted `path`, creating intermediate objects.
    /// Non-object intermediates are replaced.
    pub fn assign(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        match *first {
            "id" => warn!(id = %self.id, path, "context item ids cannot be reassigned"),
            "title" if rest.is_empty() => self.title = title_from(value),
            "title" => warn!(id = %self.id, path, "title has no nested fields"),
            "content" => assign_path(self.content.get_or_insert(Value::Null), rest, value),
            other => assign_path(
                self.extra.entry(other.to_string()).or_insert(Value::Null),
                rest,
                value,
            ),
        }
    }

    /// Shallow merge, fields present in `other` win.
    pub fn merge(&mut self, other: ContextItem) {
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.content.is_some() {
            self.content = other.content;
        }
        self.extra.extend(other.extra);
    }

    /// Shallow merge of loose fields.
    pub fn merge_fields(&mut self, fields: Map<String, Value>) {
        for (name, value) in fields {
            match name.as_str() {
                "id" => {
                    if value.as_str() != Some(self.id.as_str()) {
                        warn!(id = %self.id, "ignoring id change in update");
                    }
                }
                "title" => self.title = title_from(value),
                "content" => self.content = Some(value),
                _ => {
                    self.extra.insert(name, value);
                }
            }
        }
    }
}

fn title_from(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(stringify(&other)),
    }
}

fn assign_path(target: &mut Value, segments: &[&str], value: Value) {
    let mut current = target;
    for segment in segments {
        current = child_mut(current, segment);
    }
    *current = value;
}

fn child_mut<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = match current {
        Value::Array(list) => segment.parse::<usize>().ok().filter(|i| *i < list.len()),
        _ => None,
    };
    match (index, current) {
        (Some(i), Value::Array(list)) => &mut list[i],
        (_, current) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            // indexing an object by key inserts null when absent
            &mut current[segment]
        }
    }
}

// -----------------------------------------------------------------------------
// Flow context handler
// -----------------------------------------------------------------------------

pub type UpdateObserver = Box<dyn Fn(&str, &Value, Option<&str>) + Send + Sync>;
pub type ReadObserver = Box<dyn Fn(&str, Option<&str>) + Send + Sync>;

#[derive(Default)]
pub struct ContextObservers {
    pub on_context_update: Option<UpdateObserver>,
    pub on_context_read: Option<ReadObserver>,
}

impl ContextObservers {
    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Value, Option<&str>) + Send + Sync + 'static,
    {
        self.on_context_update = Some(Box::new(f));
        self
    }

    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&str>) + Send + Sync + 'static,
    {
        self.on_context_read = Some(Box::new(f));
        self
    }
}

/// Per-session owner of the context items and user inputs.
///
/// Every mutation made through the handler is reported to
/// `on_context_update`; every successful read to `on_context_read`.
/// Keys dropped by `clear_user_inputs` or `reset` are reported with `null`.
#[derive(Default)]
pub struct FlowContextHandler {
    items: Vec<ContextItem>,
    user_inputs: UserInputs,
    observers: ContextObservers,
}

impl FlowContextHandler {
    pub fn new(initial_items: Vec<ContextItem>, observers: ContextObservers) -> Self {
        Self {
            items: initial_items,
            user_inputs: UserInputs::new(),
            observers,
        }
    }

    pub fn with_items(initial_items: Vec<ContextItem>) -> Self {
        Self::new(initial_items, ContextObservers::default())
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn user_inputs(&self) -> &UserInputs {
        &self.user_inputs
    }

    /// Sets a context value.
    ///
    /// * unknown key: a new item is created with `content = value` and the
    ///   path is ignored
    /// * known key, no path: `content` is overwritten
    /// * known key with path: intermediate objects are created as needed
    pub fn set_value(&mut self, key: &str, value: Value, path: Option<&str>) {
        let path = path.filter(|p| !p.is_empty());
        match self.items.iter_mut().find(|item| item.id == key) {
            None => {
                if let Some(path) = path {
                    debug!(key, path, "creating context item, path ignored");
                }
                self.items.push(ContextItem::new(key, value.clone()));
            }
            Some(item) => match path {
                None => item.content = Some(value.clone()),
                Some(path) => item.assign(path, value.clone()),
            },
        }
        self.notify_update(key, &value, path);
    }

    /// User inputs first (path ignored), then context items.
    pub fn get_value(&self, key: &str, path: Option<&str>) -> Option<Value> {
        let value = resolver::get_value(key, path, &self.items, &self.user_inputs);
        if value.is_some() {
            if let Some(observer) = &self.observers.on_context_read {
                observer(key, path);
            }
        }
        value
    }

    pub fn set_user_input(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let reported = Value::String(value.clone());
        self.user_inputs.insert(key.to_string(), value);
        self.notify_update(key, &reported, None);
    }

    /// Adds an item, merging into an existing one with the same id.
    pub fn add_context_item(&mut self, item: ContextItem) {
        let id = item.id.clone();
        match self.items.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => existing.merge(item),
            None => self.items.push(item),
        }
        self.notify_item(&id);
    }

    /// Merges `fields` into the item with `id`. Returns false if there is none.
    pub fn update_context_item(&mut self, id: &str, fields: Map<String, Value>) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            warn!(id, "update for unknown context item ignored");
            return false;
        };
        item.merge_fields(fields);
        self.notify_item(id);
        true
    }

    pub fn remove_context_item(&mut self, id: &str) -> Option<ContextItem> {
        let position = self.items.iter().position(|item| item.id == id)?;
        let removed = self.items.remove(position);
        self.notify_update(id, &Value::Null, None);
        Some(removed)
    }

    /// Drops every user input, reporting each key with `null`.
    pub fn clear_user_inputs(&mut self) {
        let mut keys: Vec<String> = self.user_inputs.drain().map(|(key, _)| key).collect();
        keys.sort();
        for key in keys {
            self.notify_update(&key, &Value::Null, None);
        }
    }

    /// Drops all user inputs and replaces the items (empty when `None`).
    ///
    /// Reports cleared inputs and dropped item ids with `null`, then every
    /// new item with its content.
    pub fn reset(&mut self, items: Option<Vec<ContextItem>>) {
        self.clear_user_inputs();

        let old = std::mem::replace(&mut self.items, items.unwrap_or_default());
        for dropped in old.iter().filter(|o| !self.items.iter().any(|n| n.id == o.id)) {
            self.notify_update(&dropped.id, &Value::Null, None);
        }
        for item in &self.items {
            let content = item.content.clone().unwrap_or(Value::Null);
            self.notify_update(&item.id, &content, None);
        }
    }

    pub fn resolve(&self, text: &str, options: ResolveOptions) -> Result<String, ResolveError> {
        resolver::resolve(text, &self.items, &self.user_inputs, options)
    }

    /// Non-strict resolve: unresolved tokens stay in the text.
    pub fn resolve_text(&self, text: &str) -> String {
        self.resolve(text, ResolveOptions::default())
            .unwrap_or_else(|_| text.to_string())
    }

    fn notify_item(&self, id: &str) {
        let content = self
            .items
            .iter()
            .find(|item| item.id == id)
            .and_then(|item| item.content.clone())
            .unwrap_or(Value::Null);
        self.notify_update(id, &content, None);
    }

    fn notify_update(&self, key: &str, value: &Value, path: Option<&str>) {
        if let Some(observer) = &self.observers.on_context_update {
            observer(key, value, path);
        }
    }
}

impl fmt::Debug for FlowContextHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContextHandler")
            .field("items", &self.items)
            .field("user_inputs", &self.user_inputs)
            .finish_non_exhaustive()
    }
}
