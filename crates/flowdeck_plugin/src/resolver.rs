//! `{{variable}}` / `{{variable.path.to.prop}}` substitution.
//!
//! Lookup order for the variable name:
//! 1. user inputs (any path after a hit is ignored)
//! 2. context items, by `id` and then by `title`
//!
//! With a path, the walk starts at the item object itself, so
//! `{{user.profile.name}}` reads the item's `profile` field and
//! `{{user.content.name}}` reads inside its content.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::ContextItem;

pub type UserInputs = HashMap<String, String>;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("token pattern compiles"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fail on the first unresolved token instead of keeping it.
    pub strict: bool,
    /// Emit a debug event for every substituted token.
    pub debug: bool,
}

impl ResolveOptions {
    pub fn strict() -> Self {
        Self { strict: true, debug: false }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("path '{path}' not found on '{variable}'")]
    MissingPath { variable: String, path: String },
}

/// Replaces every token in `text`.
///
/// Non-strict: unresolved tokens are left verbatim and a failure anywhere
/// yields the original text. Strict: the first failure is returned.
pub fn resolve(
    text: &str,
    items: &[ContextItem],
    inputs: &UserInputs,
    options: ResolveOptions,
) -> Result<String, ResolveError> {
    match substitute(text, items, inputs, options) {
        Ok(out) => Ok(out),
        Err(e) if options.strict => Err(e),
        Err(e) => {
            warn!(?e, "template resolution failed, keeping original text");
            Ok(text.to_string())
        }
    }
}

fn substitute(
    text: &str,
    items: &[ContextItem],
    inputs: &UserInputs,
    options: ResolveOptions,
) -> Result<String, ResolveError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in TOKEN.captures_iter(text) {
        let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        match evaluate(expr.as_str(), items, inputs) {
            Ok(value) => {
                if options.debug {
                    debug!(token = whole.as_str(), %value, "resolved token");
                }
                out.push_str(&value);
            }
            Err(e) if options.strict => return Err(e),
            Err(e) => {
                warn!(token = whole.as_str(), %e, "unresolved token left in place");
                out.push_str(whole.as_str());
            }
        }
    }

    out.push_str(&text[last..]);
    Ok(out)
}

fn evaluate(expr: &str, items: &[ContextItem], inputs: &UserInputs) -> Result<String, ResolveError> {
    let mut segments = expr.trim().split('.');
    let variable = segments.next().unwrap_or_default();
    let path: Vec<&str> = segments.collect();

    if let Some(input) = inputs.get(variable) {
        return Ok(input.clone());
    }

    let item = find_item(items, variable)
        .ok_or_else(|| ResolveError::UnknownVariable(variable.to_string()))?;

    if path.is_empty() {
        return Ok(item.content.as_ref().map(stringify).unwrap_or_default());
    }

    item.lookup(&path)
        .map(|value| stringify(&value))
        .ok_or_else(|| ResolveError::MissingPath {
            variable: variable.to_string(),
            path: path.join("."),
        })
}

/// Raw value for `key` (and optional dotted `path`), with the same lookup
/// order as [`resolve`]. Misses log a warning and return `None`.
pub fn get_value(
    key: &str,
    path: Option<&str>,
    items: &[ContextItem],
    inputs: &UserInputs,
) -> Option<Value> {
    if let Some(input) = inputs.get(key) {
        return Some(Value::String(input.clone()));
    }

    let Some(item) = find_item(items, key) else {
        warn!(key, "no user input or context item with this key");
        return None;
    };

    match path.filter(|p| !p.is_empty()) {
        None => item.content.clone(),
        Some(path) => {
            let segments: Vec<&str> = path.split('.').collect();
            let found = item.lookup(&segments);
            if found.is_none() {
                warn!(key, path, "path not found on context item");
            }
            found
        }
    }
}

/// Finds an item by id, falling back to its title.
pub fn find_item<'a>(items: &'a [ContextItem], name: &str) -> Option<&'a ContextItem> {
    items
        .iter()
        .find(|item| item.id == name)
        .or_else(|| items.iter().find(|item| item.title.as_deref() == Some(name)))
}

/// Walks `segments` into `value`. Numeric segments index arrays.
pub fn walk<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(list) => segment.parse::<usize>().ok().and_then(|i| list.get(i)),
        _ => None,
    })
}

/// Text form of a resolved value. Null becomes the empty string, arrays are
/// comma-joined and objects are compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(list) => list.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, content: Value) -> ContextItem {
        ContextItem::new(id, content)
    }

    fn profile_item() -> ContextItem {
        let mut u = ContextItem::new("u", json!("raw"));
        u.extra.insert("profile".into(), json!({"name": "Ann", "tags": ["a", "b"]}));
        u
    }

    #[test]
    fn test_simple_substitution() {
        let items = vec![item("x", json!("v"))];
        let out = resolve("{{x}}", &items, &UserInputs::new(), ResolveOptions::default()).unwrap();
        assert_eq!(out, "v");
    }

    #[test]
    fn test_missing_variable_kept_or_rejected() {
        let inputs = UserInputs::new();
        let out = resolve("hi {{x}}!", &[], &inputs, ResolveOptions::default()).unwrap();
        assert_eq!(out, "hi {{x}}!");

        let err = resolve("hi {{x}}!", &[], &inputs, ResolveOptions::strict()).unwrap_err();
        assert_eq!(err, ResolveError::UnknownVariable("x".into()));
    }

    #[test]
    fn test_nested_path_from_item_object() {
        let items = vec![profile_item()];
        let inputs = UserInputs::new();
        let opts = ResolveOptions::default();

        assert_eq!(resolve("{{u.profile.name}}", &items, &inputs, opts).unwrap(), "Ann");
        assert_eq!(resolve("{{u.profile.tags.1}}", &items, &inputs, opts).unwrap(), "b");
        assert_eq!(
            resolve("{{u.profile.age}}", &items, &inputs, opts).unwrap(),
            "{{u.profile.age}}"
        );
        assert_eq!(
            resolve("{{u.profile.age}}", &items, &inputs, ResolveOptions::strict()).unwrap_err(),
            ResolveError::MissingPath { variable: "u".into(), path: "profile.age".into() }
        );
    }

    #[test]
    fn test_user_input_shadows_item_and_ignores_path() {
        let items = vec![profile_item()];
        let mut inputs = UserInputs::new();
        inputs.insert("u".into(), "typed".into());

        let out = resolve("{{ u }} / {{u.profile.name}}", &items, &inputs, ResolveOptions::default()).unwrap();
        assert_eq!(out, "typed / typed");
    }

    #[test]
    fn test_null_and_structured_values() {
        let mut it = item("n", Value::Null);
        it.extra.insert("flag".into(), json!(true));
        it.extra.insert("blank".into(), Value::Null);
        let items = vec![it, item("obj", json!({"a": 1})), item("list", json!([1, "two"]))];
        let inputs = UserInputs::new();
        let opts = ResolveOptions::default();

        assert_eq!(resolve("[{{n}}]", &items, &inputs, opts).unwrap(), "[]");
        assert_eq!(resolve("{{n.flag}}", &items, &inputs, opts).unwrap(), "true");
        assert_eq!(resolve("[{{n.blank}}]", &items, &inputs, opts).unwrap(), "[]");
        assert_eq!(resolve("{{obj}}", &items, &inputs, opts).unwrap(), r#"{"a":1}"#);
        assert_eq!(resolve("{{list}}", &items, &inputs, opts).unwrap(), "1,two");
    }

    #[test]
    fn test_title_is_secondary_lookup() {
        let mut titled = item("ctx-1", json!("by title"));
        titled.title = Some("greeting".into());
        let items = vec![titled, item("greeting-id", json!("by id"))];
        let inputs = UserInputs::new();

        assert_eq!(resolve("{{greeting}}", &items, &inputs, ResolveOptions::default()).unwrap(), "by title");
        assert_eq!(resolve("{{greeting-id}}", &items, &inputs, ResolveOptions::default()).unwrap(), "by id");
    }

    #[test]
    fn test_get_value_returns_raw_values() {
        let items = vec![profile_item()];
        let mut inputs = UserInputs::new();
        inputs.insert("answer".into(), "42".into());

        assert_eq!(get_value("answer", Some("ignored"), &items, &inputs), Some(json!("42")));
        assert_eq!(get_value("u", None, &items, &inputs), Some(json!("raw")));
        assert_eq!(get_value("u", Some("profile.tags"), &items, &inputs), Some(json!(["a", "b"])));
        assert_eq!(get_value("u", Some("profile.nope"), &items, &inputs), None);
        assert_eq!(get_value("missing", None, &items, &inputs), None);
    }

    #[test]
    fn test_text_without_tokens_is_unchanged() {
        let out = resolve("plain { text }", &[], &UserInputs::new(), ResolveOptions::strict()).unwrap();
        assert_eq!(out, "plain { text }");
    }
}
