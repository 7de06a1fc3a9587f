//! `${VAR}` and `${VAR:-default}` substitution in decoded string values.
//!
//! `$${VAR}` escapes a reference and yields `${VAR}` literally. Unset and
//! empty variables without a default render as the empty string.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$?\$\{([a-zA-Z0-9_]+)(?::-([^}]*))?\}").ok());

/// Substitute environment variables in every string of `tree`.
pub fn expand_env(tree: &mut Value) {
    expand_with(tree, &|name| std::env::var(name).ok());
}

fn expand_with(tree: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match tree {
        Value::String(text) => {
            if let Some(rendered) = render(text, lookup) {
                *text = rendered;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| expand_with(item, lookup)),
        Value::Object(fields) => fields
            .values_mut()
            .for_each(|value| expand_with(value, lookup)),
        _ => {}
    }
}

/// Rendered text, or `None` when `text` holds no reference.
fn render(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let pattern = REFERENCE.as_ref()?;
    if !pattern.is_match(text) {
        return None;
    }
    let rendered = pattern.replace_all(text, |caps: &Captures<'_>| {
        let whole = &caps[0];
        if let Some(escaped) = whole.strip_prefix("$$") {
            return format!("${}", escaped);
        }
        let value = lookup(&caps[1]).unwrap_or_default();
        match caps.get(2) {
            Some(default) if value.is_empty() => default.as_str().to_string(),
            _ => value,
        }
    });
    Some(rendered.into_owned())
}
