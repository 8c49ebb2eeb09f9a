//! Action nodes: entity mutations through `EntityMutationService`.

use flowgate_types::entity::{EntityRecord, QueryFilter};
use flowgate_types::node::{ActionConfig, FieldError};
use flowgate_types::output::NodeOutput;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    ActionServices, ExecutableNode, NodeContext, NodeError, ResolvedInputs, ServiceProvider,
    ValidateNode, check_entity_type,
};
use crate::workflow::template::contains_template;

impl ValidateNode for ActionConfig {
    fn validate(&self, services: &ServiceProvider) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if services.action().is_err() {
            errors.push(FieldError::new(
                "services",
                "no entity service is configured for action nodes",
            ));
        }
        check_entity_type(self.entity_type(), services, &mut errors);

        match self {
            ActionConfig::CreateEntity { entity_type, payload } => {
                check_payload(entity_type, payload, services, &mut errors);
            }
            ActionConfig::UpdateEntity {
                entity_type,
                entity_id,
                payload,
            } => {
                check_entity_id(entity_id, &mut errors);
                check_payload(entity_type, payload, services, &mut errors);
            }
            ActionConfig::DeleteEntity { entity_id, .. } => {
                check_entity_id(entity_id, &mut errors);
            }
            ActionConfig::QueryEntities { filter, limit, .. } => {
                if let Some(filter) = filter {
                    for (path, message) in filter.problems() {
                        errors.push(FieldError::new(path, message));
                    }
                }
                if *limit == Some(0) {
                    errors.push(FieldError::new("limit", "must be at least 1"));
                }
            }
        }
        errors
    }
}

fn check_entity_id(entity_id: &str, errors: &mut Vec<FieldError>) {
    if entity_id.trim().is_empty() {
        errors.push(FieldError::new("entity_id", "must not be empty"));
    } else if !contains_template(entity_id) && Uuid::parse_str(entity_id).is_err() {
        errors.push(FieldError::new(
            "entity_id",
            format!("'{entity_id}' is neither a UUID nor a template"),
        ));
    }
}

fn check_payload(
    entity_type: &str,
    payload: &Value,
    services: &ServiceProvider,
    errors: &mut Vec<FieldError>,
) {
    if !payload.is_object() {
        errors.push(FieldError::new("payload", "must be an object"));
        return;
    }
    if let Some(schemas) = services.schemas() {
        if schemas.knows_entity_type(entity_type) {
            for err in schemas.validate_payload(entity_type, payload) {
                errors.push(FieldError::new(format!("payload.{}", err.field), err.message));
            }
        }
    }
}

impl ExecutableNode for ActionConfig {
    type Services = ActionServices;

    fn input_templates(&self) -> Map<String, Value> {
        let mut inputs = Map::new();
        match self {
            ActionConfig::CreateEntity { payload, .. } => {
                inputs.insert("payload".to_string(), payload.clone());
            }
            ActionConfig::UpdateEntity {
                entity_id, payload, ..
            } => {
                inputs.insert("entity_id".to_string(), Value::String(entity_id.clone()));
                inputs.insert("payload".to_string(), payload.clone());
            }
            ActionConfig::DeleteEntity { entity_id, .. } => {
                inputs.insert("entity_id".to_string(), Value::String(entity_id.clone()));
            }
            ActionConfig::QueryEntities { filter, .. } => {
                if let Some(filter) = filter {
                    inputs.insert(
                        "filter".to_string(),
                        serde_json::to_value(filter).unwrap_or(Value::Null),
                    );
                }
            }
        }
        inputs
    }

    async fn execute(
        &self,
        context: &NodeContext,
        inputs: ResolvedInputs,
        services: &ActionServices,
    ) -> Result<NodeOutput, NodeError> {
        let entities = services.entities.as_ref();
        let workspace_id = context.workspace_id;

        match self {
            ActionConfig::CreateEntity { entity_type, .. } => {
                let payload = inputs.require("payload")?.clone();
                let record = entities.create(workspace_id, entity_type, payload).await?;
                tracing::debug!(
                    execution_id = %context.execution_id,
                    node_key = %context.node_key,
                    entity_id = %record.id,
                    "entity created"
                );
                Ok(NodeOutput::EntityCreated {
                    entity_id: record.id,
                    entity_type: record.entity_type.clone(),
                    entity: record.to_value(),
                })
            }
            ActionConfig::UpdateEntity { entity_type, .. } => {
                let entity_id = parse_entity_id(&inputs)?;
                let payload = inputs.require("payload")?.clone();
                let record = entities
                    .update(workspace_id, entity_type, entity_id, payload)
                    .await?;
                Ok(NodeOutput::EntityUpdated {
                    entity_id: record.id,
                    entity_type: record.entity_type.clone(),
                    entity: record.to_value(),
                })
            }
            ActionConfig::DeleteEntity { entity_type, .. } => {
                let entity_id = parse_entity_id(&inputs)?;
                let deleted = entities.delete(workspace_id, entity_type, entity_id).await?;
                Ok(NodeOutput::EntityDeleted {
                    entity_id,
                    entity_type: entity_type.clone(),
                    deleted,
                })
            }
            ActionConfig::QueryEntities {
                entity_type, limit, ..
            } => {
                let filter = match inputs.get("filter") {
                    Some(value) => Some(
                        serde_json::from_value::<QueryFilter>(value.clone())
                            .map_err(|e| NodeError::invalid_input("filter", e.to_string()))?,
                    ),
                    None => None,
                };
                let records = entities
                    .query(workspace_id, entity_type, filter, *limit)
                    .await?;
                let entities: Vec<Value> = records.iter().map(EntityRecord::to_value).collect();
                Ok(NodeOutput::EntitiesQueried {
                    entity_type: entity_type.clone(),
                    count: entities.len() as u64,
                    entities,
                })
            }
        }
    }
}

fn parse_entity_id(inputs: &ResolvedInputs) -> Result<Uuid, NodeError> {
    let raw = inputs.require_str("entity_id")?;
    Uuid::parse_str(raw.trim())
        .map_err(|_| NodeError::invalid_input("entity_id", format!("'{raw}' is not a UUID")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::testing::MemoryEntities;

    fn context() -> NodeContext {
        NodeContext {
            execution_id: Uuid::now_v7(),
            workspace_id: Uuid::now_v7(),
            node_id: Uuid::now_v7(),
            node_key: "action".to_string(),
            data: json!({}),
        }
    }

    fn services(store: Arc<MemoryEntities>) -> ActionServices {
        ActionServices { entities: store }
    }

    #[tokio::test]
    async fn test_create_then_update_and_delete() {
        let store = Arc::new(MemoryEntities::default());
        let services = services(store.clone());

        let create = ActionConfig::CreateEntity {
            entity_type: "ticket".to_string(),
            payload: json!({ "title": "Broken login" }),
        };
        let inputs = ResolvedInputs::new(create.input_templates());
        let output = create.execute(&context(), inputs, &services).await.unwrap();
        let NodeOutput::EntityCreated { entity_id, entity, .. } = output else {
            panic!("expected entity_created");
        };
        assert_eq!(entity["title"], "Broken login");

        let update = ActionConfig::UpdateEntity {
            entity_type: "ticket".to_string(),
            entity_id: "{{ steps.create.output.entity_id }}".to_string(),
            payload: json!({ "title": "Fixed" }),
        };
        let mut inputs = update.input_templates();
        inputs.insert("entity_id".to_string(), json!(entity_id.to_string()));
        let output = update
            .execute(&context(), ResolvedInputs::new(inputs), &services)
            .await
            .unwrap();
        assert!(matches!(output, NodeOutput::EntityUpdated { .. }));

        let delete = ActionConfig::DeleteEntity {
            entity_type: "ticket".to_string(),
            entity_id: entity_id.to_string(),
        };
        let inputs = ResolvedInputs::new(delete.input_templates());
        let output = delete.execute(&context(), inputs, &services).await.unwrap();
        assert_eq!(
            output,
            NodeOutput::EntityDeleted {
                entity_id,
                entity_type: "ticket".to_string(),
                deleted: true,
            }
        );
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let store = Arc::new(MemoryEntities::default());
        let services = services(store.clone());
        for status in ["open", "open", "closed"] {
            let create = ActionConfig::CreateEntity {
                entity_type: "ticket".to_string(),
                payload: json!({ "status": status }),
            };
            create
                .execute(&context(), ResolvedInputs::new(create.input_templates()), &services)
                .await
                .unwrap();
        }

        let query = ActionConfig::QueryEntities {
            entity_type: "ticket".to_string(),
            filter: Some(QueryFilter::Eq {
                field: "status".to_string(),
                value: json!("open"),
            }),
            limit: None,
        };
        let inputs = ResolvedInputs::new(query.input_templates());
        let output = query.execute(&context(), inputs, &services).await.unwrap();
        let NodeOutput::EntitiesQueried { count, .. } = output else {
            panic!("expected entities_queried");
        };
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_rejection_message_is_verbatim() {
        let store = Arc::new(MemoryEntities::rejecting("title is required"));
        let create = ActionConfig::CreateEntity {
            entity_type: "ticket".to_string(),
            payload: json!({}),
        };
        let err = create
            .execute(
                &context(),
                ResolvedInputs::new(create.input_templates()),
                &services(store),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "title is required");
    }

    #[tokio::test]
    async fn test_update_with_bad_entity_id() {
        let update = ActionConfig::UpdateEntity {
            entity_type: "ticket".to_string(),
            entity_id: "nope".to_string(),
            payload: json!({}),
        };
        let err = update
            .execute(
                &context(),
                ResolvedInputs::new(update.input_templates()),
                &services(Arc::new(MemoryEntities::default())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }

    #[test]
    fn test_validate_without_services() {
        let create = ActionConfig::CreateEntity {
            entity_type: "ticket".to_string(),
            payload: json!({ "title": "x" }),
        };
        let errors = create.validate(&ServiceProvider::new());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "services");
    }

    #[test]
    fn test_validate_field_errors() {
        let provider =
            ServiceProvider::new().with_entities(Arc::new(MemoryEntities::default()));
        let update = ActionConfig::UpdateEntity {
            entity_type: String::new(),
            entity_id: "not-a-uuid".to_string(),
            payload: json!([1, 2]),
        };
        let fields: Vec<String> = update
            .validate(&provider)
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["entity_type", "entity_id", "payload"]);

        let query = ActionConfig::QueryEntities {
            entity_type: "ticket".to_string(),
            filter: Some(QueryFilter::And { filters: vec![] }),
            limit: Some(0),
        };
        assert_eq!(query.validate(&provider).len(), 2);
    }
}
