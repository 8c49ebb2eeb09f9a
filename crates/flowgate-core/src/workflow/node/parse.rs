//! Parse nodes: JSON documents and delimited text.

use flowgate_types::node::{FieldError, ParseConfig};
use flowgate_types::output::NodeOutput;
use serde_json::{Map, Value};

use super::{ExecutableNode, NodeContext, NodeError, ResolvedInputs, ServiceProvider, ValidateNode};

impl ValidateNode for ParseConfig {
    fn validate(&self, _services: &ServiceProvider) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match self {
            ParseConfig::Json { source } => {
                if source.trim().is_empty() {
                    errors.push(FieldError::new("source", "must not be empty"));
                }
            }
            ParseConfig::Delimited {
                source, delimiter, ..
            } => {
                if source.trim().is_empty() {
                    errors.push(FieldError::new("source", "must not be empty"));
                }
                if delimiter.chars().count() != 1 {
                    errors.push(FieldError::new("delimiter", "must be a single character"));
                }
            }
        }
        errors
    }
}

impl ExecutableNode for ParseConfig {
    type Services = ();

    fn input_templates(&self) -> Map<String, Value> {
        let source = match self {
            ParseConfig::Json { source } | ParseConfig::Delimited { source, .. } => source,
        };
        let mut inputs = Map::new();
        inputs.insert("source".to_string(), Value::String(source.clone()));
        inputs
    }

    async fn execute(
        &self,
        _context: &NodeContext,
        inputs: ResolvedInputs,
        _services: &(),
    ) -> Result<NodeOutput, NodeError> {
        let source = inputs.require("source")?;
        match self {
            ParseConfig::Json { .. } => {
                // A whole-value template already yields structured JSON.
                let value = match source {
                    Value::String(text) => serde_json::from_str(text)
                        .map_err(|e| NodeError::Parse(format!("invalid JSON: {e}")))?,
                    other => other.clone(),
                };
                Ok(NodeOutput::JsonParsed { value })
            }
            ParseConfig::Delimited {
                delimiter,
                has_header,
                ..
            } => {
                let text = source
                    .as_str()
                    .ok_or_else(|| NodeError::invalid_input("source", "expected text"))?;
                let delimiter = delimiter
                    .chars()
                    .next()
                    .ok_or_else(|| NodeError::invalid_input("delimiter", "must not be empty"))?;
                parse_delimited(text, delimiter, *has_header)
            }
        }
    }
}

/// Split delimited text into row objects keyed by column name. Without a
/// header row, columns are named `column_1`, `column_2`, ...
fn parse_delimited(text: &str, delimiter: char, has_header: bool) -> Result<NodeOutput, NodeError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let split = |line: &str| -> Vec<String> {
        line.split(delimiter).map(|cell| cell.trim().to_string()).collect()
    };

    let mut pending_first = None;
    let columns: Vec<String> = if has_header {
        match lines.next() {
            Some((_, header)) => split(header),
            None => Vec::new(),
        }
    } else {
        match lines.next() {
            Some((n, first)) => {
                let cells = split(first);
                let names = (1..=cells.len()).map(|i| format!("column_{i}")).collect();
                pending_first = Some((n, cells));
                names
            }
            None => Vec::new(),
        }
    };

    let mut rows = Vec::new();
    let rest = lines.map(|(n, line)| (n, split(line)));
    for (n, cells) in pending_first.into_iter().chain(rest) {
        if cells.len() != columns.len() {
            return Err(NodeError::Parse(format!(
                "line {} has {} fields, expected {}",
                n + 1,
                cells.len(),
                columns.len()
            )));
        }
        let row: Map<String, Value> = columns
            .iter()
            .cloned()
            .zip(cells.into_iter().map(Value::String))
            .collect();
        rows.push(Value::Object(row));
    }

    Ok(NodeOutput::DelimitedParsed {
        row_count: rows.len() as u64,
        columns,
        rows,
    })
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
            node_key: "parse".to_string(),
            data: json!({}),
        }
    }

    fn inputs(source: Value) -> ResolvedInputs {
        let mut map = Map::new();
        map.insert("source".to_string(), source);
        ResolvedInputs::new(map)
    }

    #[tokio::test]
    async fn test_json_from_text() {
        let config = ParseConfig::Json {
            source: "{{ trigger.body }}".to_string(),
        };
        let output = config
            .execute(&context(), inputs(json!(r#"{"a": [1, 2]}"#)), &())
            .await
            .unwrap();
        assert_eq!(output, NodeOutput::JsonParsed { value: json!({ "a": [1, 2] }) });
    }

    #[tokio::test]
    async fn test_json_passes_structured_value_through() {
        let config = ParseConfig::Json {
            source: "{{ trigger.body }}".to_string(),
        };
        let output = config
            .execute(&context(), inputs(json!({ "ok": true })), &())
            .await
            .unwrap();
        assert_eq!(output, NodeOutput::JsonParsed { value: json!({ "ok": true }) });
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let config = ParseConfig::Json {
            source: "x".to_string(),
        };
        let err = config
            .execute(&context(), inputs(json!("{not json")), &())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Parse(_)));
    }

    #[test]
    fn test_delimited_with_header() {
        let output = parse_delimited("name, qty\nbolt, 4\n\nnut, 10\n", ',', true).unwrap();
        assert_eq!(
            output,
            NodeOutput::DelimitedParsed {
                columns: vec!["name".to_string(), "qty".to_string()],
                rows: vec![
                    json!({ "name": "bolt", "qty": "4" }),
                    json!({ "name": "nut", "qty": "10" }),
                ],
                row_count: 2,
            }
        );
    }

    #[test]
    fn test_delimited_without_header() {
        let output = parse_delimited("a;b\nc;d", ';', false).unwrap();
        let NodeOutput::DelimitedParsed { columns, rows, .. } = output else {
            panic!("expected delimited_parsed");
        };
        assert_eq!(columns, vec!["column_1", "column_2"]);
        assert_eq!(rows[0], json!({ "column_1": "a", "column_2": "b" }));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_delimited_ragged_row() {
        let err = parse_delimited("a,b\n1,2,3", ',', true).unwrap_err();
        assert_eq!(err.to_string(), "parse failed: line 2 has 3 fields, expected 2");
    }

    #[test]
    fn test_validate_delimiter() {
        let config = ParseConfig::Delimited {
            source: "x".to_string(),
            delimiter: "::".to_string(),
            has_header: true,
        };
        assert_eq!(config.validate(&ServiceProvider::new())[0].field, "delimiter");
    }
}
