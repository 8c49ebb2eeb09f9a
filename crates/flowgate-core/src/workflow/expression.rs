//! JEXL expression evaluator for control-flow nodes.
//!
//! Wraps `jexl_eval::Evaluator` with the standard transforms registered.
//! Run data is always passed as the context object and never spliced into
//! the expression text.

use serde_json::{Value, json};

use super::node::ExpressionEvaluator;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("expression does not parse: {0}")]
    Syntax(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with string, boolean and length transforms.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(first_str(args).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(first_str(args).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(first_str(args).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = first_str(args).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate to a raw JSON value. `context` must be an object.
    pub fn evaluate_value(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate and coerce the result with JavaScript-like truthiness.
    pub fn evaluate_bool(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, context)
            .map(|result| truthy(&result))
    }

    /// Reject expressions that cannot parse or name an unknown transform.
    ///
    /// Evaluates against an empty context; lookup failures caused by the
    /// missing run data are not reported.
    pub fn check(&self, expression: &str) -> Result<(), ExpressionError> {
        if expression.trim().is_empty() {
            return Err(ExpressionError::Syntax("expression is empty".to_string()));
        }
        match self.evaluator.eval_in_context(expression, json!({})) {
            Ok(_) => Ok(()),
            Err(e) => {
                let kind = format!("{e:?}");
                if kind.starts_with("ParseError") || kind.starts_with("UnknownTransform") {
                    Err(ExpressionError::Syntax(e.to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn first_str(args: &[Value]) -> &str {
    args.first().and_then(|v| v.as_str()).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Control-flow capability
// ---------------------------------------------------------------------------

/// `ExpressionEvaluator` backed by JEXL.
///
/// The underlying evaluator holds boxed transform closures, so one is built
/// per call instead of being shared between tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct JexlExpressionEvaluator;

impl ExpressionEvaluator for JexlExpressionEvaluator {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        WorkflowEvaluator::new().evaluate_value(expression, context)
    }

    fn check(&self, expression: &str) -> Result<(), ExpressionError> {
        WorkflowEvaluator::new().check(expression)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new()
    }

    #[test]
    fn test_step_output_lookup() {
        let ctx = json!({
            "steps": {
                "create": { "status": "completed", "output": { "entity_type": "ticket" } }
            }
        });
        let result = evaluator()
            .evaluate_value("steps.create.output.entity_type", &ctx)
            .unwrap();
        assert_eq!(result, json!("ticket"));
    }

    #[test]
    fn test_boolean_and() {
        let ctx = json!({ "trigger": { "payload": { "priority": "high", "open": true } } });
        let eval = evaluator();
        assert!(eval
            .evaluate_bool("trigger.payload.priority == 'high' && trigger.payload.open", &ctx)
            .unwrap());
        assert!(!eval
            .evaluate_bool("trigger.payload.priority == 'low' && trigger.payload.open", &ctx)
            .unwrap());
    }

    #[test]
    fn test_transforms() {
        let ctx = json!({ "name": "  Hello World  ", "tags": ["a", "b", "c"] });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("name|trim|lower", &ctx).unwrap(), json!("hello world"));
        assert_eq!(eval.evaluate_value("tags|length", &ctx).unwrap(), json!(3.0));
        assert!(eval.evaluate_bool("name|contains('World')", &ctx).unwrap());
        assert!(eval.evaluate_bool("(name|trim)|startsWith('Hello')", &ctx).unwrap());
    }

    #[test]
    fn test_ternary() {
        let ctx = json!({ "count": 10.0 });
        let result = evaluator()
            .evaluate_value("(count > 5) ? 'high' : 'low'", &ctx)
            .unwrap();
        assert_eq!(result, json!("high"));
    }

    #[test]
    fn test_missing_property_is_null() {
        let ctx = json!({ "trigger": {} });
        let result = evaluator().evaluate_value("trigger.missing", &ctx).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0.0)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn test_invalid_context_not_object() {
        assert!(matches!(
            evaluator().evaluate_value("true", &json!("nope")),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_check_accepts_valid_expression() {
        let eval = evaluator();
        assert!(eval.check("steps.review.output.result == true").is_ok());
        assert!(eval.check("trigger.payload.amount > 100").is_ok());
    }

    #[test]
    fn test_check_rejects_syntax_error() {
        let eval = evaluator();
        assert!(matches!(eval.check("a == == b"), Err(ExpressionError::Syntax(_))));
        assert!(matches!(eval.check("   "), Err(ExpressionError::Syntax(_))));
    }

    #[test]
    fn test_jexl_capability() {
        let eval = JexlExpressionEvaluator;
        let ctx = json!({ "x": 2.0 });
        assert_eq!(eval.evaluate("x * 2", &ctx).unwrap(), json!(4.0));
    }
}
