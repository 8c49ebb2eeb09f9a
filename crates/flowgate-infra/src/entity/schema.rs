//! Entity type schemas from `[[entities]]` in `flowgate.toml`.

use dashmap::DashMap;
use flowgate_core::workflow::node::SchemaValidator;
use flowgate_core::workflow::template::contains_template;
use flowgate_types::config::EntityTypeConfig;
use flowgate_types::node::FieldError;
use serde_json::Value;

#[derive(Default)]
pub struct InMemorySchemaRegistry {
    types: DashMap<String, EntityTypeConfig>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(types: &[EntityTypeConfig]) -> Self {
        let registry = Self::new();
        for schema in types {
            registry.register(schema.clone());
        }
        registry
    }

    /// Add or replace the schema of `schema.name`.
    pub fn register(&self, schema: EntityTypeConfig) {
        tracing::debug!(
            entity_type = %schema.name,
            fields = schema.fields.len(),
            "entity type registered"
        );
        self.types.insert(schema.name.clone(), schema);
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Check stored data. Unlike publish-time validation, every value is
    /// final here, so nothing is skipped. Unknown types pass.
    pub fn check_record(&self, entity_type: &str, data: &Value) -> Vec<FieldError> {
        match self.types.get(entity_type) {
            Some(schema) => field_errors(&schema, data, false),
            None => Vec::new(),
        }
    }
}

fn field_errors(
    schema: &EntityTypeConfig,
    payload: &Value,
    skip_templates: bool,
) -> Vec<FieldError> {
    let Some(map) = payload.as_object() else {
        return vec![FieldError::new("", "must be an object")];
    };

    let mut errors = Vec::new();
    for required in &schema.required {
        if map.get(required).is_none_or(Value::is_null) {
            errors.push(FieldError::new(required.as_str(), "is required"));
        }
    }

    for (field, value) in map {
        let Some(expected) = schema.fields.get(field) else {
            if !schema.fields.is_empty() {
                errors.push(FieldError::new(
                    field.as_str(),
                    format!("is not a field of {}", schema.name),
                ));
            }
            continue;
        };
        let templated = value.as_str().is_some_and(contains_template);
        if value.is_null() || (skip_templates && templated) {
            continue;
        }
        if !expected.matches(value) {
            errors.push(FieldError::new(
                field.as_str(),
                format!("expected {expected:?}").to_lowercase(),
            ));
        }
    }
    errors
}

impl SchemaValidator for InMemorySchemaRegistry {
    fn knows_entity_type(&self, entity_type: &str) -> bool {
        self.types.contains_key(entity_type)
    }

    fn validate_payload(&self, entity_type: &str, payload: &Value) -> Vec<FieldError> {
        match self.types.get(entity_type) {
            Some(schema) => field_errors(&schema, payload, true),
            None => Vec::new(),
        }
    }
}
