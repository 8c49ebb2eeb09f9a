//! `{{ path }}` template resolution.
//!
//! Paths are dot-separated and rooted at `steps`, `trigger` or `workflow`;
//! numeric segments index arrays. A string that is exactly one template
//! resolves to the referenced value with its JSON type preserved. Templates
//! embedded in longer strings are interpolated as text.

use serde_json::Value;

/// Roots a template path may start with.
pub const TEMPLATE_ROOTS: [&str; 3] = ["steps", "trigger", "workflow"];

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated template starting at byte {position}")]
    Unterminated { position: usize },

    #[error("empty template expression at byte {position}")]
    EmptyExpression { position: usize },

    #[error("template path '{path}' must start with steps, trigger or workflow")]
    UnknownRoot { path: String },

    #[error("template reference '{path}' did not resolve")]
    Unresolved { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Path(&'a str),
}

/// Split `input` into literal text and trimmed template paths.
fn segments(input: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut out = Vec::new();
    let mut rest = input;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            return Err(TemplateError::Unterminated {
                position: offset + start,
            });
        };
        let path = after_open[..end].trim();
        if path.is_empty() {
            return Err(TemplateError::EmptyExpression {
                position: offset + start,
            });
        }
        out.push(Segment::Path(path));

        let consumed = start + OPEN.len() + end + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    Ok(out)
}

/// Whether the string carries at least one template marker.
pub fn contains_template(input: &str) -> bool {
    input.contains(OPEN)
}

/// Walk a dotted path through objects and arrays.
pub fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn check_root(path: &str) -> Result<(), TemplateError> {
    let root = path.split('.').next().unwrap_or_default();
    if TEMPLATE_ROOTS.contains(&root) {
        Ok(())
    } else {
        Err(TemplateError::UnknownRoot {
            path: path.to_string(),
        })
    }
}

fn resolve_path<'a>(context: &'a Value, path: &str) -> Result<&'a Value, TemplateError> {
    check_root(path)?;
    lookup_path(context, path).ok_or_else(|| TemplateError::Unresolved {
        path: path.to_string(),
    })
}

/// Resolve every template in one string.
pub fn resolve_str(input: &str, context: &Value) -> Result<Value, TemplateError> {
    let parts = segments(input)?;

    if let [Segment::Path(path)] = parts.as_slice() {
        return resolve_path(context, path).cloned();
    }

    let mut out = String::with_capacity(input.len());
    for part in parts {
        match part {
            Segment::Text(text) => out.push_str(text),
            Segment::Path(path) => out.push_str(&value_to_string(resolve_path(context, path)?)),
        }
    }
    Ok(Value::String(out))
}

/// Resolve templates recursively through strings, arrays and object values.
/// Object keys are never resolved.
pub fn resolve_value(value: &Value, context: &Value) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) if contains_template(s) => resolve_str(s, context),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, context)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Every template path referenced anywhere in `value`, in document order.
/// Fails on malformed markers or unknown roots.
pub fn template_paths(value: &Value) -> Result<Vec<String>, TemplateError> {
    let mut paths = Vec::new();
    collect_paths(value, &mut paths)?;
    Ok(paths)
}

fn collect_paths(value: &Value, paths: &mut Vec<String>) -> Result<(), TemplateError> {
    match value {
        Value::String(s) => {
            for part in segments(s)? {
                if let Segment::Path(path) = part {
                    check_root(path)?;
                    paths.push(path.to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_paths(item, paths)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_paths(item, paths)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Text form of a value when interpolated into a longer string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
