//! Step outputs, node outputs and trigger contexts.
//!
//! `NodeOutput` and `TriggerContext` are closed variant families. Each variant
//! produces a flat property map (`to_map`) used by template resolution, and
//! declares the fields that map is guaranteed to carry (`declared_fields`).
//! The declared keys are always a subset of the map's keys, with values of the
//! declared type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::execution::NodeExecutionStatus;
use crate::node::EntityEventKind;

use OutputFieldType as T;

// ---------------------------------------------------------------------------
// Field metadata
// ---------------------------------------------------------------------------

/// Runtime JSON type of a declared output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Any JSON value, including null.
    Any,
}

impl OutputFieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Declared metadata for one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputField {
    pub key: &'static str,
    pub field_type: OutputFieldType,
    /// Whether `null` is an acceptable value.
    pub nullable: bool,
}

impl OutputField {
    const fn new(key: &'static str, field_type: OutputFieldType) -> Self {
        Self {
            key,
            field_type,
            nullable: false,
        }
    }

    const fn nullable(key: &'static str, field_type: OutputFieldType) -> Self {
        Self {
            key,
            field_type,
            nullable: true,
        }
    }

    /// Whether `value` satisfies this field's declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        (self.nullable && value.is_null()) || self.field_type.matches(value)
    }
}

/// Returns the declared fields missing from `map` or carrying the wrong type.
pub fn undeclared_violations(map: &Map<String, Value>, fields: &[OutputField]) -> Vec<String> {
    fields
        .iter()
        .filter(|f| !map.get(f.key).is_some_and(|v| f.accepts(v)))
        .map(|f| f.key.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Node output
// ---------------------------------------------------------------------------

/// Result payload of a completed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeOutput {
    EntityCreated {
        entity_id: Uuid,
        entity_type: String,
        entity: Value,
    },
    EntityUpdated {
        entity_id: Uuid,
        entity_type: String,
        entity: Value,
    },
    EntityDeleted {
        entity_id: Uuid,
        entity_type: String,
        deleted: bool,
    },
    EntitiesQueried {
        entity_type: String,
        entities: Vec<Value>,
        count: u64,
    },
    ConditionEvaluated {
        expression: String,
        result: bool,
    },
    SwitchEvaluated {
        expression: String,
        value: Value,
        matched: Option<String>,
    },
    ValuesSet {
        values: Map<String, Value>,
    },
    Logged {
        message: String,
        level: String,
    },
    JsonParsed {
        value: Value,
    },
    DelimitedParsed {
        columns: Vec<String>,
        rows: Vec<Value>,
        row_count: u64,
    },
}

const ENTITY_WRITE_FIELDS: &[OutputField] = &[
    OutputField::new("entity_id", T::String),
    OutputField::new("entity_type", T::String),
    OutputField::new("entity", T::Object),
];
const ENTITY_DELETE_FIELDS: &[OutputField] = &[
    OutputField::new("entity_id", T::String),
    OutputField::new("entity_type", T::String),
    OutputField::new("deleted", T::Boolean),
];
const ENTITY_QUERY_FIELDS: &[OutputField] = &[
    OutputField::new("entity_type", T::String),
    OutputField::new("entities", T::Array),
    OutputField::new("count", T::Integer),
];
const CONDITION_FIELDS: &[OutputField] = &[
    OutputField::new("expression", T::String),
    OutputField::new("result", T::Boolean),
];
const SWITCH_FIELDS: &[OutputField] = &[
    OutputField::new("expression", T::String),
    OutputField::new("value", T::Any),
    OutputField::nullable("matched", T::String),
];
const VALUES_FIELDS: &[OutputField] = &[OutputField::new("values", T::Object)];
const LOG_FIELDS: &[OutputField] = &[
    OutputField::new("message", T::String),
    OutputField::new("level", T::String),
];
const JSON_FIELDS: &[OutputField] = &[OutputField::new("value", T::Any)];
const DELIMITED_FIELDS: &[OutputField] = &[
    OutputField::new("columns", T::Array),
    OutputField::new("rows", T::Array),
    OutputField::new("row_count", T::Integer),
];

impl NodeOutput {
    /// Flat property map exposed to templates as `steps.<key>.output`.
    pub fn to_map(&self) -> Map<String, Value> {
        let value = match self {
            Self::EntityCreated {
                entity_id,
                entity_type,
                entity,
            }
            | Self::EntityUpdated {
                entity_id,
                entity_type,
                entity,
            } => json!({
                "entity_id": entity_id.to_string(),
                "entity_type": entity_type,
                "entity": entity,
            }),
            Self::EntityDeleted {
                entity_id,
                entity_type,
                deleted,
            } => json!({
                "entity_id": entity_id.to_string(),
                "entity_type": entity_type,
                "deleted": deleted,
            }),
            Self::EntitiesQueried {
                entity_type,
                entities,
                count,
            } => json!({
                "entity_type": entity_type,
                "entities": entities,
                "count": count,
            }),
            Self::ConditionEvaluated { expression, result } => json!({
                "expression": expression,
                "result": result,
            }),
            Self::SwitchEvaluated {
                expression,
                value,
                matched,
            } => json!({
                "expression": expression,
                "value": value,
                "matched": matched,
            }),
            // Values are exposed both flattened and under `values`.
            Self::ValuesSet { values } => {
                let mut map = values.clone();
                map.insert("values".to_string(), Value::Object(values.clone()));
                return map;
            }
            Self::Logged { message, level } => json!({
                "message": message,
                "level": level,
            }),
            Self::JsonParsed { value } => json!({ "value": value }),
            Self::DelimitedParsed {
                columns,
                rows,
                row_count,
            } => json!({
                "columns": columns,
                "rows": rows,
                "row_count": row_count,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Fields every map produced by this variant is guaranteed to carry.
    pub fn declared_fields(&self) -> &'static [OutputField] {
        match self {
            Self::EntityCreated { .. } | Self::EntityUpdated { .. } => ENTITY_WRITE_FIELDS,
            Self::EntityDeleted { .. } => ENTITY_DELETE_FIELDS,
            Self::EntitiesQueried { .. } => ENTITY_QUERY_FIELDS,
            Self::ConditionEvaluated { .. } => CONDITION_FIELDS,
            Self::SwitchEvaluated { .. } => SWITCH_FIELDS,
            Self::ValuesSet { .. } => VALUES_FIELDS,
            Self::Logged { .. } => LOG_FIELDS,
            Self::JsonParsed { .. } => JSON_FIELDS,
            Self::DelimitedParsed { .. } => DELIMITED_FIELDS,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }
}

// ---------------------------------------------------------------------------
// Trigger context
// ---------------------------------------------------------------------------

/// What started a run. Exposed to templates as `trigger`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TriggerContext {
    EntityEvent {
        entity_type: String,
        entity_id: Uuid,
        event: EntityEventKind,
        entity: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Value>,
    },
    Schedule {
        cron: String,
        scheduled_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
    },
    Webhook {
        method: String,
        path: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: Value,
    },
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        submitted_by: Option<String>,
        #[serde(default)]
        payload: Value,
    },
}

impl TriggerContext {
    /// A manual trigger with the given payload.
    pub fn manual(payload: Value) -> Self {
        Self::Manual {
            submitted_by: None,
            payload,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::EntityEvent { .. } => "entity_event",
            Self::Schedule { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::Manual { .. } => "manual",
        }
    }

    /// Flat property map exposed to templates as `trigger`.
    pub fn to_map(&self) -> Map<String, Value> {
        let value = match self {
            Self::EntityEvent {
                entity_type,
                entity_id,
                event,
                entity,
                previous,
            } => json!({
                "source": self.source(),
                "entity_type": entity_type,
                "entity_id": entity_id.to_string(),
                "event": event.as_str(),
                "entity": entity,
                "previous": previous,
            }),
            Self::Schedule {
                cron,
                scheduled_at,
                fired_at,
            } => json!({
                "source": self.source(),
                "cron": cron,
                "scheduled_at": scheduled_at.to_rfc3339(),
                "fired_at": fired_at.to_rfc3339(),
            }),
            Self::Webhook {
                method,
                path,
                headers,
                body,
            } => json!({
                "source": self.source(),
                "method": method,
                "path": path,
                "headers": headers,
                "body": body,
            }),
            Self::Manual {
                submitted_by,
                payload,
            } => json!({
                "source": self.source(),
                "submitted_by": submitted_by,
                "payload": payload,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn declared_fields(&self) -> &'static [OutputField] {
        match self {
            Self::EntityEvent { .. } => ENTITY_EVENT_TRIGGER_FIELDS,
            Self::Schedule { .. } => SCHEDULE_TRIGGER_FIELDS,
            Self::Webhook { .. } => WEBHOOK_TRIGGER_FIELDS,
            Self::Manual { .. } => MANUAL_TRIGGER_FIELDS,
        }
    }
}

const ENTITY_EVENT_TRIGGER_FIELDS: &[OutputField] = &[
    OutputField::new("source", T::String),
    OutputField::new("entity_type", T::String),
    OutputField::new("entity_id", T::String),
    OutputField::new("event", T::String),
    OutputField::new("entity", T::Any),
    OutputField::nullable("previous", T::Any),
];
const SCHEDULE_TRIGGER_FIELDS: &[OutputField] = &[
    OutputField::new("source", T::String),
    OutputField::new("cron", T::String),
    OutputField::new("scheduled_at", T::String),
    OutputField::new("fired_at", T::String),
];
const WEBHOOK_TRIGGER_FIELDS: &[OutputField] = &[
    OutputField::new("source", T::String),
    OutputField::new("method", T::String),
    OutputField::new("path", T::String),
    OutputField::new("headers", T::Object),
    OutputField::new("body", T::Any),
];
const MANUAL_TRIGGER_FIELDS: &[OutputField] = &[
    OutputField::new("source", T::String),
    OutputField::nullable("submitted_by", T::String),
    OutputField::new("payload", T::Any),
];

// ---------------------------------------------------------------------------
// Step output
// ---------------------------------------------------------------------------

/// Immutable record of one finished node, appended once to the data registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub node_id: Uuid,
    pub node_key: String,
    pub node_name: String,
    /// `Completed` or `Skipped`.
    pub status: NodeExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}
