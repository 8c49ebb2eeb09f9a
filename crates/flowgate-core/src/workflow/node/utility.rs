//! Utility nodes. No collaborators needed.

use flowgate_types::node::{FieldError, LogLevel, UtilityConfig};
use flowgate_types::output::NodeOutput;
use serde_json::{Map, Value};

use super::{
    ExecutableNode, NodeContext, NodeError, ResolvedInputs, ServiceProvider, ValidateNode,
};
use crate::workflow::template::value_to_string;

/// Set-values output also carries the whole map under this key.
const RESERVED_VALUE_KEY: &str = "values";

impl ValidateNode for UtilityConfig {
    fn validate(&self, _services: &ServiceProvider) -> Vec<FieldError> {
        match self {
            UtilityConfig::SetValues { values } if values.is_empty() => {
                vec![FieldError::new("values", "at least one value is required")]
            }
            UtilityConfig::SetValues { values } if values.contains_key(RESERVED_VALUE_KEY) => {
                vec![FieldError::new(
                    format!("values.{RESERVED_VALUE_KEY}"),
                    format!("'{RESERVED_VALUE_KEY}' is reserved for the full value map"),
                )]
            }
            UtilityConfig::Log { message, .. } if message.trim().is_empty() => {
                vec![FieldError::new("message", "must not be empty")]
            }
            _ => Vec::new(),
        }
    }
}

impl ExecutableNode for UtilityConfig {
    type Services = ();

    fn input_templates(&self) -> Map<String, Value> {
        let mut inputs = Map::new();
        match self {
            UtilityConfig::SetValues { values } => {
                inputs.insert("values".to_string(), Value::Object(values.clone()));
            }
            UtilityConfig::Log { message, .. } => {
                inputs.insert("message".to_string(), Value::String(message.clone()));
            }
        }
        inputs
    }

    async fn execute(
        &self,
        context: &NodeContext,
        inputs: ResolvedInputs,
        _services: &(),
    ) -> Result<NodeOutput, NodeError> {
        match self {
            UtilityConfig::SetValues { .. } => match inputs.require("values")? {
                Value::Object(values) => Ok(NodeOutput::ValuesSet {
                    values: values.clone(),
                }),
                _ => Err(NodeError::invalid_input("values", "expected an object")),
            },
            UtilityConfig::Log { level, .. } => {
                let message = value_to_string(inputs.require("message")?);
                let execution_id = context.execution_id;
                let node_key = context.node_key.as_str();
                match level {
                    LogLevel::Debug => tracing::debug!(%execution_id, node_key, "{message}"),
                    LogLevel::Info => tracing::info!(%execution_id, node_key, "{message}"),
                    LogLevel::Warn => tracing::warn!(%execution_id, node_key, "{message}"),
                    LogLevel::Error => tracing::error!(%execution_id, node_key, "{message}"),
                }
                Ok(NodeOutput::Logged {
                    message,
                    level: level.as_str().to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn context() -> NodeContext {
        NodeContext {
            execution_id: Uuid::now_v7(),
            workspace_id: Uuid::now_v7(),
            node_id: Uuid::now_v7(),
            node_key: "util".to_string(),
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn test_set_values_uses_resolved_inputs() {
        let config = UtilityConfig::SetValues {
            values: json!({ "owner": "{{ trigger.payload.owner }}" })
                .as_object()
                .cloned()
                .unwrap(),
        };
        let mut resolved = Map::new();
        resolved.insert("values".to_string(), json!({ "owner": "ana" }));
        let output = config
            .execute(&context(), ResolvedInputs::new(resolved), &())
            .await
            .unwrap();
        assert_eq!(output.to_map()["owner"], "ana");
    }

    #[tokio::test]
    async fn test_log_stringifies_non_string_message() {
        let config = UtilityConfig::Log {
            message: "{{ steps.count.output.value }}".to_string(),
            level: LogLevel::Warn,
        };
        let mut resolved = Map::new();
        resolved.insert("message".to_string(), json!(42));
        let output = config
            .execute(&context(), ResolvedInputs::new(resolved), &())
            .await
            .unwrap();
        assert_eq!(
            output,
            NodeOutput::Logged {
                message: "42".to_string(),
                level: "warn".to_string(),
            }
        );
    }

    #[test]
    fn test_validate() {
        let empty = UtilityConfig::SetValues { values: Map::new() };
        assert_eq!(empty.validate(&ServiceProvider::new()).len(), 1);
        let log = UtilityConfig::Log {
            message: "hello".to_string(),
            level: LogLevel::Info,
        };
        assert!(log.validate(&ServiceProvider::new()).is_empty());
    }

    #[test]
    fn test_validate_rejects_reserved_values_key() {
        let shadowing = UtilityConfig::SetValues {
            values: json!({ "values": 1, "owner": "ana" })
                .as_object()
                .cloned()
                .unwrap(),
        };
        let errors = shadowing.validate(&ServiceProvider::new());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "values.values");

        let plain = UtilityConfig::SetValues {
            values: json!({ "owner": "ana" }).as_object().cloned().unwrap(),
        };
        assert!(plain.validate(&ServiceProvider::new()).is_empty());
    }
}
