//! Node configuration types.
//!
//! A workflow node's configuration is a closed, two-level tagged union: the
//! outer `category` tag picks one of seven node categories, and each category
//! enum carries its own `sub_type` tag. Both levels are exhaustive so adding a
//! variant forces every dispatcher to handle it.
//!
//! ```yaml
//! config:
//!   category: action
//!   sub_type: create_entity
//!   entity_type: ticket
//!   payload:
//!     title: "{{ trigger.entity.subject }}"
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::QueryFilter;

/// Highest node configuration schema version this build understands.
pub const CURRENT_NODE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// The seven node categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    ControlFlow,
    Function,
    Utility,
    Parse,
    HumanInteraction,
}

impl NodeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::ControlFlow => "control_flow",
            Self::Function => "function",
            Self::Utility => "utility",
            Self::Parse => "parse",
            Self::HumanInteraction => "human_interaction",
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-tagged node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    ControlFlow(ControlFlowConfig),
    Function(FunctionConfig),
    Utility(UtilityConfig),
    Parse(ParseConfig),
    HumanInteraction(HumanInteractionConfig),
}

impl NodeConfig {
    pub fn category(&self) -> NodeCategory {
        match self {
            Self::Trigger(_) => NodeCategory::Trigger,
            Self::Action(_) => NodeCategory::Action,
            Self::ControlFlow(_) => NodeCategory::ControlFlow,
            Self::Function(_) => NodeCategory::Function,
            Self::Utility(_) => NodeCategory::Utility,
            Self::Parse(_) => NodeCategory::Parse,
            Self::HumanInteraction(_) => NodeCategory::HumanInteraction,
        }
    }

    /// The category-specific `sub_type` discriminant.
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::Trigger(c) => c.sub_type(),
            Self::Action(c) => c.sub_type(),
            Self::ControlFlow(c) => c.sub_type(),
            Self::Function(c) => c.sub_type(),
            Self::Utility(c) => c.sub_type(),
            Self::Parse(c) => c.sub_type(),
            Self::HumanInteraction(c) => c.sub_type(),
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger(_))
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Entry-point configuration. Trigger nodes are never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fires when an entity of `entity_type` changes.
    EntityEvent {
        entity_type: String,
        #[serde(default)]
        events: Vec<EntityEventKind>,
    },
    /// Fires on a cron schedule.
    Schedule {
        cron: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Fires on an inbound HTTP request.
    Webhook {
        path: String,
        #[serde(default = "default_webhook_method")]
        method: String,
    },
    /// Fires when a run is submitted by hand.
    Manual {},
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl TriggerConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::EntityEvent { .. } => "entity_event",
            Self::Schedule { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::Manual {} => "manual",
        }
    }
}

/// Kind of entity change an entity-event trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityEventKind {
    Created,
    Updated,
    Deleted,
}

impl EntityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Entity mutations and queries, executed through the entity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum ActionConfig {
    CreateEntity {
        entity_type: String,
        payload: serde_json::Value,
    },
    UpdateEntity {
        entity_type: String,
        /// Entity id, usually a template such as `{{ steps.create.output.entity_id }}`.
        entity_id: String,
        payload: serde_json::Value,
    },
    DeleteEntity {
        entity_type: String,
        entity_id: String,
    },
    QueryEntities {
        entity_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<QueryFilter>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
}

impl ActionConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. } => "create_entity",
            Self::UpdateEntity { .. } => "update_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::QueryEntities { .. } => "query_entities",
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            Self::CreateEntity { entity_type, .. }
            | Self::UpdateEntity { entity_type, .. }
            | Self::DeleteEntity { entity_type, .. }
            | Self::QueryEntities { entity_type, .. } => entity_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

/// Expression-driven control flow nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum ControlFlowConfig {
    /// Evaluates a boolean JEXL expression.
    Condition { expression: String },
    /// Evaluates an expression and matches it against a list of cases.
    Switch {
        expression: String,
        cases: Vec<SwitchCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_label: Option<String>,
    },
}

impl ControlFlowConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::Condition { .. } => "condition",
            Self::Switch { .. } => "switch",
        }
    }
}

/// A single `switch` case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub label: String,
    pub value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

/// User-supplied code. No executor exists yet; runs are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum FunctionConfig {
    Script { language: String, source: String },
}

impl FunctionConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::Script { .. } => "script",
        }
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum UtilityConfig {
    /// Emits a fixed (template-resolved) set of values.
    SetValues {
        values: serde_json::Map<String, serde_json::Value>,
    },
    /// Writes a message to the engine log.
    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
}

impl UtilityConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::SetValues { .. } => "set_values",
            Self::Log { .. } => "log",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum ParseConfig {
    /// Parses a JSON document held in `source`.
    Json { source: String },
    /// Parses delimited text (CSV-like) held in `source` into row objects.
    Delimited {
        source: String,
        #[serde(default = "default_delimiter")]
        delimiter: String,
        #[serde(default = "default_has_header")]
        has_header: bool,
    },
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_has_header() -> bool {
    true
}

impl ParseConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::Json { .. } => "json",
            Self::Delimited { .. } => "delimited",
        }
    }
}

// ---------------------------------------------------------------------------
// Human interaction
// ---------------------------------------------------------------------------

/// Human-in-the-loop nodes. Pausing is not supported; runs are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum HumanInteractionConfig {
    Approval {
        #[serde(default)]
        approvers: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Form {
        fields: Vec<FormField>,
    },
}

impl HumanInteractionConfig {
    pub fn sub_type(&self) -> &'static str {
        match self {
            Self::Approval { .. } => "approval",
            Self::Form { .. } => "form",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(default = "default_form_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_form_field_type() -> String {
    "string".to_string()
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A single field-level configuration error reported by `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `payload.title`).
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
