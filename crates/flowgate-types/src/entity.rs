//! Entity records and query filters used by action nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored business entity, as returned by the entity-mutation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub entity_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Flat JSON view: the entity's data plus `id` and `entity_type`.
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = match &self.data {
            serde_json::Value::Object(m) => m.clone(),
            other => {
                let mut m = serde_json::Map::new();
                m.insert("data".to_string(), other.clone());
                m
            }
        };
        map.insert("id".to_string(), serde_json::Value::String(self.id.to_string()));
        map.insert(
            "entity_type".to_string(),
            serde_json::Value::String(self.entity_type.clone()),
        );
        serde_json::Value::Object(map)
    }
}

/// Closed filter language for `query_entities` action nodes.
///
/// Field paths are dot-separated (`address.city`). Comparison values may be
/// templates; they are resolved before the filter reaches the entity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueryFilter {
    Eq {
        field: String,
        value: serde_json::Value,
    },
    NotEq {
        field: String,
        value: serde_json::Value,
    },
    Gt {
        field: String,
        value: serde_json::Value,
    },
    Lt {
        field: String,
        value: serde_json::Value,
    },
    /// String containment, or membership for arrays.
    Contains {
        field: String,
        value: serde_json::Value,
    },
    IsNull {
        field: String,
    },
    And {
        filters: Vec<QueryFilter>,
    },
    Or {
        filters: Vec<QueryFilter>,
    },
    Not {
        filter: Box<QueryFilter>,
    },
}

impl QueryFilter {
    /// Evaluate the filter against an entity's data.
    pub fn matches(&self, data: &serde_json::Value) -> bool {
        match self {
            Self::Eq { field, value } => lookup(data, field) == Some(value),
            Self::NotEq { field, value } => lookup(data, field) != Some(value),
            Self::Gt { field, value } => {
                compare(lookup(data, field), value) == Some(std::cmp::Ordering::Greater)
            }
            Self::Lt { field, value } => {
                compare(lookup(data, field), value) == Some(std::cmp::Ordering::Less)
            }
            Self::Contains { field, value } => match lookup(data, field) {
                Some(serde_json::Value::String(s)) => {
                    value.as_str().is_some_and(|needle| s.contains(needle))
                }
                Some(serde_json::Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Self::IsNull { field } => {
                matches!(lookup(data, field), None | Some(serde_json::Value::Null))
            }
            Self::And { filters } => filters.iter().all(|f| f.matches(data)),
            Self::Or { filters } => filters.iter().any(|f| f.matches(data)),
            Self::Not { filter } => !filter.matches(data),
        }
    }

    /// Structural problems, as `(path, message)` pairs relative to this filter.
    pub fn problems(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_problems("filter", &mut out);
        out
    }

    fn collect_problems(&self, path: &str, out: &mut Vec<(String, String)>) {
        match self {
            Self::Eq { field, .. }
            | Self::NotEq { field, .. }
            | Self::Gt { field, .. }
            | Self::Lt { field, .. }
            | Self::Contains { field, .. }
            | Self::IsNull { field } => {
                if field.trim().is_empty() {
                    out.push((format!("{path}.field"), "field path must not be empty".to_string()));
                }
            }
            Self::And { filters } | Self::Or { filters } => {
                if filters.is_empty() {
                    out.push((
                        format!("{path}.filters"),
                        "must contain at least one filter".to_string(),
                    ));
                }
                for (i, f) in filters.iter().enumerate() {
                    f.collect_problems(&format!("{path}.filters[{i}]"), out);
                }
            }
            Self::Not { filter } => filter.collect_problems(&format!("{path}.filter"), out),
        }
    }
}

fn lookup<'a>(data: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(data, |current, segment| current.get(segment))
}

fn compare(
    left: Option<&serde_json::Value>,
    right: &serde_json::Value,
) -> Option<std::cmp::Ordering> {
    match (left?, right) {
        (serde_json::Value::Number(a), serde_json::Value::Number(b)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (serde_json::Value::String(a), serde_json::Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
