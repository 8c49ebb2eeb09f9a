//! Control-flow nodes: JEXL conditions and switches.

use std::collections::HashSet;

use flowgate_types::node::{ControlFlowConfig, FieldError, SwitchCase};
use flowgate_types::output::NodeOutput;
use serde_json::{Map, Value};

use super::{
    ControlServices, ExecutableNode, NodeContext, NodeError, ResolvedInputs, ServiceProvider,
    ValidateNode,
};
use crate::workflow::expression::truthy;

impl ValidateNode for ControlFlowConfig {
    fn validate(&self, services: &ServiceProvider) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let expression = match self {
            ControlFlowConfig::Condition { expression } => expression,
            ControlFlowConfig::Switch { expression, .. } => expression,
        };

        match services.control() {
            Ok(control) => {
                if let Err(e) = control.evaluator.check(expression) {
                    errors.push(FieldError::new("expression", e.to_string()));
                }
            }
            Err(_) => {
                errors.push(FieldError::new(
                    "services",
                    "no expression evaluator is configured for control-flow nodes",
                ));
            }
        }

        if let ControlFlowConfig::Switch {
            cases,
            default_label,
            ..
        } = self
        {
            if cases.is_empty() {
                errors.push(FieldError::new("cases", "at least one case is required"));
            }
            let mut labels = HashSet::new();
            for (i, case) in cases.iter().enumerate() {
                if case.label.trim().is_empty() {
                    errors.push(FieldError::new(format!("cases[{i}].label"), "must not be empty"));
                } else if !labels.insert(case.label.as_str()) {
                    errors.push(FieldError::new(
                        format!("cases[{i}].label"),
                        format!("duplicate label '{}'", case.label),
                    ));
                }
            }
            if default_label.as_deref().is_some_and(|l| l.trim().is_empty()) {
                errors.push(FieldError::new("default_label", "must not be empty"));
            }
        }
        errors
    }
}

impl ExecutableNode for ControlFlowConfig {
    type Services = ControlServices;

    fn input_templates(&self) -> Map<String, Value> {
        let mut inputs = Map::new();
        if let ControlFlowConfig::Switch { cases, .. } = self {
            inputs.insert(
                "cases".to_string(),
                serde_json::to_value(cases).unwrap_or(Value::Array(Vec::new())),
            );
        }
        inputs
    }

    async fn execute(
        &self,
        context: &NodeContext,
        inputs: ResolvedInputs,
        services: &ControlServices,
    ) -> Result<NodeOutput, NodeError> {
        match self {
            ControlFlowConfig::Condition { expression } => {
                let value = services.evaluator.evaluate(expression, &context.data)?;
                let result = truthy(&value);
                tracing::debug!(
                    execution_id = %context.execution_id,
                    node_key = %context.node_key,
                    result,
                    "condition evaluated"
                );
                Ok(NodeOutput::ConditionEvaluated {
                    expression: expression.clone(),
                    result,
                })
            }
            ControlFlowConfig::Switch {
                expression,
                default_label,
                ..
            } => {
                let value = services.evaluator.evaluate(expression, &context.data)?;
                let cases: Vec<SwitchCase> =
                    serde_json::from_value(inputs.require("cases")?.clone())
                        .map_err(|e| NodeError::invalid_input("cases", e.to_string()))?;
                let matched = cases
                    .iter()
                    .find(|case| values_equal(&case.value, &value))
                    .map(|case| case.label.clone())
                    .or_else(|| default_label.clone());
                Ok(NodeOutput::SwitchEvaluated {
                    expression: expression.clone(),
                    value,
                    matched,
                })
            }
        }
    }
}

/// JSON equality that treats `2` and `2.0` as the same number, since JEXL
/// produces floats.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
