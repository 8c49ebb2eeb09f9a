//! Per-execution data registry.
//!
//! Holds the trigger context and one immutable `StepOutput` per finished
//! node. Later nodes read it through templates and JEXL expressions.

use std::collections::BTreeMap;

use flowgate_types::config::RegistryLimits;
use flowgate_types::output::{StepOutput, TriggerContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("output for node '{node_key}' is already recorded")]
    AlreadyRecorded { node_key: String },

    #[error("output of node '{node_key}' is {size} bytes, exceeding the {max} byte limit")]
    StepOutputTooLarge {
        node_key: String,
        size: usize,
        max: usize,
    },

    #[error("registry would grow to {total} bytes, exceeding the {max} byte limit")]
    RegistryFull { total: usize, max: usize },

    #[error("registry snapshot error: {0}")]
    Snapshot(String),
}

/// Trigger context plus step outputs keyed by node key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDataRegistry {
    pub execution_id: Uuid,
    pub workspace_id: Uuid,
    pub trigger: TriggerContext,
    steps: BTreeMap<String, StepOutput>,
    total_bytes: usize,
    #[serde(skip, default)]
    limits: RegistryLimits,
}

impl WorkflowDataRegistry {
    pub fn new(
        execution_id: Uuid,
        workspace_id: Uuid,
        trigger: TriggerContext,
        limits: RegistryLimits,
    ) -> Self {
        Self {
            execution_id,
            workspace_id,
            trigger,
            steps: BTreeMap::new(),
            total_bytes: 0,
            limits,
        }
    }

    /// Append a step output. Each node records at most once.
    pub fn record(&mut self, step: StepOutput) -> Result<(), RegistryError> {
        if self.steps.contains_key(&step.node_key) {
            return Err(RegistryError::AlreadyRecorded {
                node_key: step.node_key,
            });
        }

        let size = serde_json::to_vec(&step)
            .map_err(|e| RegistryError::Snapshot(e.to_string()))?
            .len();
        if size > self.limits.max_step_output_bytes {
            tracing::warn!(
                node_key = %step.node_key,
                size,
                max = self.limits.max_step_output_bytes,
                "step output exceeds size limit"
            );
            return Err(RegistryError::StepOutputTooLarge {
                node_key: step.node_key,
                size,
                max: self.limits.max_step_output_bytes,
            });
        }

        let total = self.total_bytes + size;
        if total > self.limits.max_registry_bytes {
            return Err(RegistryError::RegistryFull {
                total,
                max: self.limits.max_registry_bytes,
            });
        }

        self.total_bytes = total;
        self.steps.insert(step.node_key.clone(), step);
        Ok(())
    }

    pub fn get(&self, node_key: &str) -> Option<&StepOutput> {
        self.steps.get(node_key)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepOutput> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Serialized size of all recorded step outputs.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Context object templates resolve against.
    ///
    /// ```json
    /// {
    ///   "trigger": { "source": "...", ... },
    ///   "steps": { "<key>": { "status": "...", "output": {...} | null, ... } },
    ///   "workflow": { "execution_id": "...", "workspace_id": "..." }
    /// }
    /// ```
    pub fn template_context(&self) -> Value {
        let mut steps = Map::new();
        for (key, step) in &self.steps {
            steps.insert(
                key.clone(),
                json!({
                    "status": step.status.as_str(),
                    "output": step.output.as_ref().map(|o| o.to_value()),
                    "node_id": step.node_id.to_string(),
                    "node_name": step.node_name,
                    "duration_ms": step.duration_ms,
                    "skip_reason": step.skip_reason,
                }),
            );
        }

        json!({
            "trigger": Value::Object(self.trigger.to_map()),
            "steps": steps,
            "workflow": {
                "execution_id": self.execution_id.to_string(),
                "workspace_id": self.workspace_id.to_string(),
            }
        })
    }

    /// Context object JEXL expressions evaluate against. Same shape as the
    /// template context.
    pub fn expression_context(&self) -> Value {
        self.template_context()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(json!({}))
    }

    /// Restore a snapshot. Limits are not part of the snapshot.
    pub fn from_json(value: Value, limits: RegistryLimits) -> Result<Self, RegistryError> {
        let mut registry: Self = serde_json::from_value(value)
            .map_err(|e| RegistryError::Snapshot(format!("failed to restore registry: {e}")))?;
        registry.limits = limits;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowgate_types::execution::NodeExecutionStatus;
    use flowgate_types::output::NodeOutput;

    fn registry() -> WorkflowDataRegistry {
        WorkflowDataRegistry::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            TriggerContext::manual(json!({ "title": "hello" })),
            RegistryLimits::default(),
        )
    }

    fn completed(key: &str, output: NodeOutput) -> StepOutput {
        StepOutput {
            node_id: Uuid::now_v7(),
            node_key: key.to_string(),
            node_name: key.to_string(),
            status: NodeExecutionStatus::Completed,
            output: Some(output),
            skip_reason: None,
            executed_at: Utc::now(),
            duration_ms: 4,
        }
    }

    #[test]
    fn test_record_and_get() {
        let mut reg = registry();
        reg.record(completed(
            "check",
            NodeOutput::ConditionEvaluated {
                expression: "true".to_string(),
                result: true,
            },
        ))
        .unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.get("check").is_some());
        assert!(reg.total_bytes() > 0);
    }

    #[test]
    fn test_duplicate_record_rejected() {
        let mut reg = registry();
        let output = NodeOutput::JsonParsed { value: json!(1) };
        reg.record(completed("parse", output.clone())).unwrap();
        let err = reg.record(completed("parse", output)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRecorded { .. }));
    }

    #[test]
    fn test_step_output_limit() {
        let mut reg = WorkflowDataRegistry::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            TriggerContext::manual(Value::Null),
            RegistryLimits {
                max_step_output_bytes: 256,
                max_registry_bytes: 1024,
            },
        );
        let big = NodeOutput::JsonParsed {
            value: json!("x".repeat(512)),
        };
        let err = reg.record(completed("big", big)).unwrap_err();
        assert!(matches!(err, RegistryError::StepOutputTooLarge { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_registry_limit() {
        let mut reg = WorkflowDataRegistry::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            TriggerContext::manual(Value::Null),
            RegistryLimits {
                max_step_output_bytes: 400,
                max_registry_bytes: 500,
            },
        );
        let chunk = || NodeOutput::JsonParsed {
            value: json!("y".repeat(100)),
        };
        reg.record(completed("one", chunk())).unwrap();
        let err = reg.record(completed("two", chunk())).unwrap_err();
        assert!(matches!(err, RegistryError::RegistryFull { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_template_context_shape() {
        let mut reg = registry();
        reg.record(completed(
            "set",
            NodeOutput::ValuesSet {
                values: json!({ "greeting": "hi" }).as_object().cloned().unwrap(),
            },
        ))
        .unwrap();
        reg.record(StepOutput {
            node_id: Uuid::now_v7(),
            node_key: "approve".to_string(),
            node_name: "Approve".to_string(),
            status: NodeExecutionStatus::Skipped,
            output: None,
            skip_reason: Some("no executor".to_string()),
            executed_at: Utc::now(),
            duration_ms: 0,
        })
        .unwrap();

        let ctx = reg.template_context();
        assert_eq!(ctx["trigger"]["source"], "manual");
        assert_eq!(ctx["trigger"]["payload"]["title"], "hello");
        assert_eq!(ctx["steps"]["set"]["status"], "completed");
        assert_eq!(ctx["steps"]["set"]["output"]["greeting"], "hi");
        assert_eq!(ctx["steps"]["approve"]["status"], "skipped");
        assert!(ctx["steps"]["approve"]["output"].is_null());
        assert_eq!(ctx["workflow"]["execution_id"], reg.execution_id.to_string());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut reg = registry();
        reg.record(completed(
            "log",
            NodeOutput::Logged {
                message: "done".to_string(),
                level: "info".to_string(),
            },
        ))
        .unwrap();

        let restored =
            WorkflowDataRegistry::from_json(reg.to_json(), RegistryLimits::default()).unwrap();
        assert_eq!(restored.execution_id, reg.execution_id);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.total_bytes(), reg.total_bytes());
        assert!(WorkflowDataRegistry::from_json(json!("bad"), RegistryLimits::default()).is_err());
    }
}
